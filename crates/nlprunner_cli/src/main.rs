//! `nlprunner`: clinical-NLP pipeline controller CLI (spec.md §6).

mod cli;
mod cloud;
mod democonfig;
mod factory;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::Cli;
use nlprunner_core::{
    merge_summaries, BoundExtractor, Controller, FailurePolicy, NlpRunnerConfig, PlanMode, Planner, RunSummary, ShardAssignment,
};
use nlprunner_db::{create_pool, CommitThresholds, DbConfig, DestinationWriter, ProgressStore};
use nlprunner_ids::RunId;
use nlprunner_logging::{init_logging, LogConfig};
use std::process::ExitCode;
use tracing::{error, info};

/// Configuration or argument-parsing failures: fatal, nothing ran.
const EXIT_CONFIG_ERROR: u8 = 2;
/// The run completed but at least one record failed processing.
const EXIT_RUNTIME_FAILURE: u8 = 1;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(LogConfig {
        app_name: "nlprunner",
        verbose: cli.verbose,
    }) {
        eprintln!("warning: failed to initialize logging: {err:?}");
    }

    match run(cli) {
        Ok(RunOutcome::Success) => ExitCode::SUCCESS,
        Ok(RunOutcome::RuntimeFailure) => ExitCode::from(EXIT_RUNTIME_FAILURE),
        Err(err) => {
            error!(error = ?err, "nlprunner failed");
            eprintln!("error: {err:?}");
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

enum RunOutcome {
    Success,
    RuntimeFailure,
}

fn run(cli: Cli) -> Result<RunOutcome> {
    if cli.democonfig {
        println!("{}", democonfig::DEMO_CONFIG);
        return Ok(RunOutcome::Success);
    }

    let config_path = cli.config.as_ref().context("--config is required (or pass --democonfig)")?;
    let config = NlpRunnerConfig::load_from_file(config_path).with_context(|| format!("loading config from {}", config_path.display()))?;

    if cli.listprocessors || cli.describeprocessors {
        return print_processors(&cli, &config);
    }

    if cli.is_cloud_command() {
        return run_cloud_command(&cli, &config);
    }

    run_pipeline(&cli, &config)
}

fn print_processors(cli: &Cli, config: &NlpRunnerConfig) -> Result<RunOutcome> {
    let registry = factory::build_registry(config, cli.immediate)?;
    let descriptors = registry.list_descriptors();

    if cli.describeprocessors {
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
    } else {
        for descriptor in &descriptors {
            println!("{}\t{}\t{:?}", descriptor.name, descriptor.version, descriptor.schema_type);
        }
    }
    Ok(RunOutcome::Success)
}

fn run_cloud_command(cli: &Cli, config: &NlpRunnerConfig) -> Result<RunOutcome> {
    let nlpdef = cli.nlpdef.first().context("--cloud operations require exactly one --nlpdef")?;
    let cloud_section = cloud::resolve_cloud_section(config, nlpdef)?;
    let client = cloud::CloudClient::new(cloud_section)?;

    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    runtime.block_on(async {
        if cli.showqueue {
            let response = client.show_queue().await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        } else if cli.retrieve {
            let fetched = client.retrieve().await?;
            println!("{}", serde_json::to_string_pretty(&fetched)?);
        } else if let Some(queue_id) = &cli.cancelrequest {
            let response = client.cancel_request(queue_id).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        } else if cli.cancelall {
            let response = client.cancel_all().await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(RunOutcome::Success)
}

fn run_pipeline(cli: &Cli, config: &NlpRunnerConfig) -> Result<RunOutcome> {
    let definition_names: Vec<String> = if cli.nlpdef.is_empty() {
        config.nlp_definitions.keys().cloned().collect()
    } else {
        cli.nlpdef.clone()
    };
    if definition_names.is_empty() {
        bail!("no nlp definitions selected: pass --nlpdef or declare at least one [nlpdef:NAME] section");
    }

    let shard = ShardAssignment::new(cli.process, cli.nprocesses).map_err(anyhow::Error::msg)?;
    let mode = if cli.full { PlanMode::Full } else { PlanMode::Incremental };

    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    let mut summaries = Vec::with_capacity(definition_names.len());

    for name in &definition_names {
        let summary = runtime.block_on(run_one_definition(cli, config, name, mode, shard))?;
        summaries.push(summary);
    }

    let merged = merge_summaries(summaries);
    println!("{}", serde_json::to_string_pretty(&merged)?);

    if merged.had_failures() {
        Ok(RunOutcome::RuntimeFailure)
    } else {
        Ok(RunOutcome::Success)
    }
}

async fn run_one_definition(
    cli: &Cli,
    config: &NlpRunnerConfig,
    definition_name: &str,
    mode: PlanMode,
    shard: ShardAssignment,
) -> Result<RunSummary> {
    let definition = config
        .nlp_definitions
        .get(definition_name)
        .with_context(|| format!("unknown nlp definition '{definition_name}'"))?
        .clone();
    let input = config
        .inputs
        .get(&definition.input_name)
        .with_context(|| format!("nlp definition '{definition_name}' references unknown input '{}'", definition.input_name))?
        .clone();
    let output = config
        .outputs
        .get(&definition.output_name)
        .with_context(|| format!("nlp definition '{definition_name}' references unknown output '{}'", definition.output_name))?
        .clone();

    let source_db = config
        .databases
        .get(&input.source_db)
        .with_context(|| format!("input '{}' references unknown database '{}'", input.input_name, input.source_db))?;
    let dest_db = config
        .databases
        .get(&output.database)
        .with_context(|| format!("output '{}' references unknown database '{}'", output.name, output.database))?;

    let source_pool = create_pool(DbConfig::from_url(&source_db.url)?).await?;
    let dest_pool = create_pool(DbConfig::from_url(&dest_db.url)?).await?;

    let progress_store = ProgressStore::new(dest_pool.clone());
    progress_store.ensure_schema().await?;

    let thresholds = CommitThresholds {
        max_rows_before_commit: cli.max_rows_before_commit.unwrap_or(output.max_rows_before_commit),
        max_bytes_before_commit: cli.max_bytes_before_commit.unwrap_or(output.max_bytes_before_commit),
    };
    let mut writer = DestinationWriter::new(dest_pool, thresholds);

    let registry = factory::build_registry(config, cli.immediate)?;
    let mut bound_extractors = Vec::with_capacity(definition.processors.len());
    for binding in &definition.processors {
        let extractor = registry
            .instantiate(&binding.processor_name, binding.processor_version.as_deref())
            .with_context(|| format!("instantiating processor '{}' for nlp definition '{definition_name}'", binding.processor_name))?;

        let descriptor = extractor.describe();
        if let Some(schema) = &descriptor.tabular_schema {
            for (table, columns) in schema.tables() {
                let table_name: &str = if table.is_empty() { descriptor.name.as_str() } else { table };
                writer.ensure_schema(table_name, columns, cli.dropremake).await?;
            }
        }

        bound_extractors.push(BoundExtractor {
            binding: binding.clone(),
            extractor,
        });
    }

    let mut planner = Planner::new(source_pool, input.clone(), &definition, mode, shard.selector());
    let controller = Controller::new(definition.clone(), bound_extractors, cli.chunksize, FailurePolicy::ContinueAndCount);

    let run_id = RunId::new();
    info!(nlp_definition = %definition_name, run_id = %run_id, "starting run");
    let summary = controller.run(&mut planner, &mut writer, &progress_store, run_id).await?;

    if !cli.skipdelete && matches!(mode, PlanMode::Full) {
        info!(nlp_definition = %definition_name, "full mode: deletion-detection pass is a no-op until all source pages are re-materialized per run");
    }

    Ok(summary)
}
