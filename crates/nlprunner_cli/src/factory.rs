//! Turns parsed `[processor:NAME]` / `[env:NAME]` config sections into a
//! populated `ExtractorRegistry` (spec.md §4.2 "processor selection").

use anyhow::{bail, Context, Result};
use nlprunner_core::{EnvSection, NlpRunnerConfig, ProcessorSection};
use nlprunner_extractors::coprocess::{CoprocessConfig, CoprocessExtractor};
use nlprunner_extractors::regex::RegexExtractor;
use nlprunner_extractors::remote::{RemoteConfig, RemoteExtractor};
use nlprunner_extractors::{Extractor, ExtractorFactory, ExtractorRegistry};
use std::sync::Arc;
use std::time::Duration;

/// Build an `ExtractorRegistry` from every `[processor:NAME]` section in
/// `config`. `force_immediate` overrides a `remote` processor's configured
/// `queue = true` (spec.md §6 "`--immediate`").
pub fn build_registry(config: &NlpRunnerConfig, force_immediate: bool) -> Result<ExtractorRegistry> {
    let mut registry = ExtractorRegistry::new();

    for sections in config.processors.values() {
        for section in sections {
            let factory = build_factory(config, section, force_immediate)
                .with_context(|| format!("building processor '{}@{}'", section.name, section.version))?;
            registry.register(section.name.clone(), section.version.clone(), section.is_default_version, factory);
        }
    }

    Ok(registry)
}

fn build_factory(config: &NlpRunnerConfig, section: &ProcessorSection, force_immediate: bool) -> Result<ExtractorFactory> {
    let section = section.clone();
    match section.processor_type.as_str() {
        "regex" => {
            let builtin = section
                .properties
                .get("builtin")
                .map(|s| s.as_str())
                .unwrap_or(section.name.as_str())
                .to_string();
            Ok(Arc::new(move || {
                let extractor = match builtin.as_str() {
                    "crp" | "crp_finder" => RegexExtractor::crp_finder(section.version.clone()),
                    "mmse" | "mmse_finder" => RegexExtractor::mmse_finder(section.version.clone()),
                    "crp_validator" => RegexExtractor::crp_validator(section.version.clone()),
                    "mmse_validator" => RegexExtractor::mmse_validator(section.version.clone()),
                    other => {
                        return Err(nlprunner_extractors::ExtractorError::Config(format!(
                            "unknown regex builtin rule '{other}'; expected one of 'crp', 'mmse', 'crp_validator', 'mmse_validator'"
                        )))
                    }
                }
                .map_err(|e| nlprunner_extractors::ExtractorError::Config(e.to_string()))?;
                Ok(Arc::new(extractor) as Arc<dyn Extractor>)
            }))
        }
        "coprocess" => {
            let coprocess_config = build_coprocess_config(config, &section)?;
            Ok(Arc::new(move || Ok(Arc::new(CoprocessExtractor::new(coprocess_config.clone())) as Arc<dyn Extractor>)))
        }
        "remote" => {
            let remote_config = build_remote_config(config, &section, force_immediate)?;
            Ok(Arc::new(move || {
                RemoteExtractor::new(remote_config.clone()).map(|e| Arc::new(e) as Arc<dyn Extractor>)
            }))
        }
        other => bail!("unknown processor type '{other}' for '{}'", section.name),
    }
}

fn build_coprocess_config(config: &NlpRunnerConfig, section: &ProcessorSection) -> Result<CoprocessConfig> {
    let command = section
        .properties
        .get("command")
        .with_context(|| format!("[processor:{}] missing required key 'command'", section.name))?;

    let mut coprocess = CoprocessConfig::new(section.name.clone(), section.version.clone(), command.clone());

    if let Some(args) = section.properties.get("args") {
        coprocess.args = args.split_whitespace().map(str::to_string).collect();
    }
    if let Some(terminator) = section.properties.get("input_terminator") {
        coprocess.input_terminator = unescape(terminator);
    }
    if let Some(terminator) = section.properties.get("output_terminator") {
        coprocess.output_terminator = unescape(terminator);
    }
    if let Some(timeout) = section.properties.get("response_timeout_secs") {
        let secs: u64 = timeout.parse().context("response_timeout_secs must be an integer")?;
        coprocess.response_timeout = Duration::from_secs(secs);
    }
    if let Some(max_uses) = section.properties.get("max_external_prog_uses") {
        coprocess.max_external_prog_uses = Some(max_uses.parse().context("max_external_prog_uses must be an integer")?);
    }
    if let Some(env_name) = section.properties.get("env") {
        let env_section: &EnvSection = config
            .envs
            .get(env_name)
            .with_context(|| format!("[processor:{}] references unknown [env:{env_name}]", section.name))?;
        coprocess = coprocess.with_env(env_section.variables.clone());
    }

    Ok(coprocess)
}

fn build_remote_config(config: &NlpRunnerConfig, section: &ProcessorSection, force_immediate: bool) -> Result<RemoteConfig> {
    let cloud_name = section
        .properties
        .get("cloud")
        .with_context(|| format!("[processor:{}] missing required key 'cloud'", section.name))?;
    let cloud = config
        .clouds
        .get(cloud_name)
        .with_context(|| format!("[processor:{}] references unknown [cloud:{cloud_name}]", section.name))?;

    let mut remote = RemoteConfig::new(section.name.clone(), section.version.clone(), cloud.base_url.clone(), cloud.processor_name.clone());
    remote.max_records_per_request = cloud.max_records_per_request;
    remote.max_content_length = cloud.max_content_length;
    remote.rate_limit_hz = cloud.rate_limit_hz;
    remote.max_tries = cloud.max_tries;
    remote.stop_at_failure = cloud.stop_at_failure;
    remote.queue = !force_immediate
        && section
            .properties
            .get("queue")
            .map(|v| v.parse::<bool>())
            .transpose()
            .context("'queue' must be true/false")?
            .unwrap_or(false);

    Ok(remote)
}

fn unescape(raw: &str) -> String {
    raw.replace("\\n", "\n").replace("\\r", "\r").replace("\\t", "\t")
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlprunner_core::NlpRunnerConfig;

    fn load(ini: &str) -> NlpRunnerConfig {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, ini.as_bytes()).unwrap();
        NlpRunnerConfig::load_from_file(file.path()).unwrap()
    }

    #[test]
    fn unescape_turns_literal_escapes_into_control_characters() {
        assert_eq!(unescape(r"\n"), "\n");
        assert_eq!(unescape(r"a\tb\r"), "a\tb\r");
    }

    #[test]
    fn builds_registry_for_regex_processors_with_defaults() {
        let config = load(
            "[database:sourcedb]\nurl = sqlite:./source.db\n\n\
             [input:notes]\nsource_db = sourcedb\nsource_table = notes\n\
             source_pk_field = id\nsource_text_field = body\n\n\
             [output:results]\ndatabase = sourcedb\n\n\
             [processor:crp_finder]\ntype = regex\n\n\
             [processor:mmse_finder]\ntype = regex\n\n\
             [nlpdef:crp]\ninput = notes\noutput = results\n\
             processors = crp_finder, mmse_finder\nhashphrase = secret\n",
        );

        let registry = build_registry(&config, false).unwrap();
        let descriptors = registry.list_descriptors();
        let names: Vec<&str> = descriptors.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"crp_finder"));
        assert!(names.contains(&"mmse_finder"));
    }

    #[test]
    fn rejects_unknown_regex_builtin() {
        let config = load(
            "[database:sourcedb]\nurl = sqlite:./source.db\n\n\
             [input:notes]\nsource_db = sourcedb\nsource_table = notes\n\
             source_pk_field = id\nsource_text_field = body\n\n\
             [output:results]\ndatabase = sourcedb\n\n\
             [processor:bogus_finder]\ntype = regex\n\n\
             [nlpdef:crp]\ninput = notes\noutput = results\nprocessors = bogus_finder\nhashphrase = secret\n",
        );

        let registry = build_registry(&config, false).unwrap();
        assert!(registry.instantiate("bogus_finder", None).is_err());
    }

    #[test]
    fn rejects_coprocess_section_missing_command() {
        let config = load(
            "[database:sourcedb]\nurl = sqlite:./source.db\n\n\
             [input:notes]\nsource_db = sourcedb\nsource_table = notes\n\
             source_pk_field = id\nsource_text_field = body\n\n\
             [output:results]\ndatabase = sourcedb\n\n\
             [processor:clinical_ner]\ntype = coprocess\n\n\
             [nlpdef:crp]\ninput = notes\noutput = results\nprocessors = clinical_ner\nhashphrase = secret\n",
        );

        assert!(build_registry(&config, false).is_err());
    }

    #[test]
    fn immediate_flag_overrides_configured_queue_true() {
        let config = load(
            "[database:sourcedb]\nurl = sqlite:./source.db\n\n\
             [input:notes]\nsource_db = sourcedb\nsource_table = notes\n\
             source_pk_field = id\nsource_text_field = body\n\n\
             [output:results]\ndatabase = sourcedb\n\n\
             [cloud:regional]\nbase_url = https://nlprp.example.org\nprocessor_name = medication_extractor\n\n\
             [processor:medication_extractor]\ntype = remote\ncloud = regional\nqueue = true\n\n\
             [nlpdef:crp]\ninput = notes\noutput = results\nprocessors = medication_extractor\nhashphrase = secret\n",
        );

        let section = &config.processors["medication_extractor"][0];
        let not_forced = build_remote_config(&config, section, false).unwrap();
        assert!(not_forced.queue);

        let forced = build_remote_config(&config, section, true).unwrap();
        assert!(!forced.queue);
    }
}
