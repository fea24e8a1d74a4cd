//! Drives one NLP definition end to end: pull a batch, skip unchanged
//! records (incremental mode), run each bound extractor, write results,
//! update progress (spec.md §4.1 "Controller").

use crate::error::CoreError;
use crate::model::{ExtractorBinding, NlpDefinition, RunSummary, SourceRecord};
use crate::planner::Planner;
use nlprunner_db::{DestinationWriter, ExtractionRow, ProgressEntry, ProgressStore};
use nlprunner_extractors::{Extractor, ExtractionInput};
use nlprunner_ids::RunId;
use nlprunner_protocol::{compute_source_hash, HashKey};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// One resolved extractor ready to run, alongside the binding it satisfies.
pub struct BoundExtractor {
    pub binding: ExtractorBinding,
    pub extractor: Arc<dyn Extractor>,
}

/// Controls whether a failed record aborts the whole run or is merely
/// counted and skipped (spec.md §6 "`stop_at_failure`").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    StopAtFirstFailure,
    ContinueAndCount,
}

pub struct Controller {
    definition: NlpDefinition,
    extractors: Vec<BoundExtractor>,
    hash_key: HashKey,
    batch_size: usize,
    failure_policy: FailurePolicy,
}

impl Controller {
    pub fn new(definition: NlpDefinition, extractors: Vec<BoundExtractor>, batch_size: usize, failure_policy: FailurePolicy) -> Self {
        let hash_key = HashKey::from_phrase(&definition.hashphrase);
        Self {
            definition,
            extractors,
            hash_key,
            batch_size,
            failure_policy,
        }
    }

    /// Run the full pipeline for this definition: page through `planner`,
    /// dispatch to every bound extractor, write to `writer`, record
    /// progress in `store`. Returns a populated `RunSummary`.
    pub async fn run(
        &self,
        planner: &mut Planner,
        writer: &mut DestinationWriter,
        store: &ProgressStore,
        run_id: RunId,
    ) -> Result<RunSummary, CoreError> {
        let mut summary = RunSummary::started(run_id.clone());
        let incremental = matches!(planner.mode(), crate::planner::PlanMode::Incremental);

        loop {
            let batch = planner.next_batch(self.batch_size).await?;
            if batch.is_empty() {
                break;
            }
            summary.records_considered += batch.len() as u64;

            let mut to_process = Vec::with_capacity(batch.len());
            let mut hashes: HashMap<String, String> = HashMap::new();

            for record in &batch {
                let hash = compute_source_hash(&self.hash_key, &record.text, &record.copy_values);
                let record_id = source_record_identity(record);

                if incremental {
                    if let Some(existing) = store.get(&record.key).await? {
                        if existing.source_hash == hash.to_string() {
                            summary.records_skipped_unchanged += 1;
                            continue;
                        }
                    }
                }

                hashes.insert(record_id, hash.to_string());
                to_process.push(record.clone());
            }

            if to_process.is_empty() {
                continue;
            }

            let inputs: Vec<ExtractionInput> = to_process
                .iter()
                .map(|r| ExtractionInput {
                    record_id: source_record_identity(r),
                    text: r.text.clone(),
                })
                .collect();

            let mut failed_ids: std::collections::HashSet<String> = std::collections::HashSet::new();

            for bound in &self.extractors {
                let outcomes = bound.extractor.process_batch(inputs.clone()).await.map_err(CoreError::from)?;

                for outcome in outcomes {
                    if !outcome.is_success() {
                        warn!(
                            processor = %bound.binding.processor_name,
                            record = %outcome.record_id,
                            error = ?outcome.error,
                            "extractor reported failure"
                        );
                        failed_ids.insert(outcome.record_id.clone());
                        summary.records_failed += 1;
                        if self.failure_policy == FailurePolicy::StopAtFirstFailure {
                            return Err(CoreError::Config(format!(
                                "stop_at_failure: '{}' failed on record {}",
                                bound.binding.processor_name, outcome.record_id
                            )));
                        }
                        continue;
                    }

                    let Some(record) = to_process.iter().find(|r| source_record_identity(r) == outcome.record_id) else {
                        continue;
                    };

                    for field_row in outcome.rows {
                        summary.rows_written += 1;
                        writer
                            .write(ExtractionRow {
                                destination_table: field_row.table,
                                fields: field_row.fields,
                                source_key: record.key.clone(),
                                processor_name: bound.binding.processor_name.clone(),
                                processor_version: bound.binding.processor_version.clone().unwrap_or_default(),
                                when_processed_utc: chrono::Utc::now(),
                            })
                            .await?;
                    }
                }
            }

            writer.flush().await?;

            for record in &to_process {
                let record_id = source_record_identity(record);
                if failed_ids.contains(&record_id) {
                    continue;
                }
                let Some(hash) = hashes.get(&record_id) else { continue };
                store
                    .upsert(&ProgressEntry {
                        key: record.key.clone(),
                        source_hash: hash.clone(),
                        when_processed_utc: chrono::Utc::now(),
                        run_id: run_id.clone(),
                    })
                    .await?;
                summary.records_processed += 1;
            }
        }

        info!(
            nlp_definition = %self.definition.name,
            considered = summary.records_considered,
            processed = summary.records_processed,
            skipped = summary.records_skipped_unchanged,
            failed = summary.records_failed,
            "run complete"
        );

        Ok(summary.finish())
    }
}

fn source_record_identity(record: &SourceRecord) -> String {
    match (record.key.source_pk_int, &record.key.source_pk_str) {
        (Some(i), _) => i.to_string(),
        (None, Some(s)) => s.clone(),
        (None, None) => String::new(),
    }
}
