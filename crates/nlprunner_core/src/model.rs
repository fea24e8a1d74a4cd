//! Core data model (spec.md §3): NLP definitions, input field bindings, and
//! the source/progress record shapes the `Planner` and `Controller` pass
//! between each other.

use chrono::{DateTime, Utc};
use nlprunner_db::SourceKey;
use nlprunner_ids::RunId;
use serde::{Deserialize, Serialize};

/// One `[input:NAME]` section: where free text and its copy-through
/// columns live in a source database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputFieldSpec {
    pub input_name: String,
    pub source_db: String,
    pub source_table: String,
    pub source_pk_field: String,
    pub source_text_field: String,
    /// Extra columns copied verbatim alongside every extracted row and
    /// folded into the `source_hash` so a copy-column-only edit still
    /// triggers reprocessing (spec.md §3 "copy fields").
    pub copy_fields: Vec<String>,
    /// WHERE-clause fragment restricting which rows this input considers
    /// (e.g. excluding soft-deleted rows).
    pub source_where: Option<String>,
}

/// One `[processor:NAME]` binding used by an `[nlpdef:NAME]` section: which
/// extractor to run and, for the Extractor's own output, which destination
/// table(s) results land in (resolved from the extractor's own
/// `ProcessorDescriptor` at runtime; this struct only carries the
/// reference).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorBinding {
    pub processor_name: String,
    pub processor_version: Option<String>,
}

/// One `[nlpdef:NAME]` section: an input plus the extractors run over it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NlpDefinition {
    pub name: String,
    pub input_name: String,
    /// Which `[output:NAME]` section this definition's extracted rows (and
    /// progress ledger) are written to.
    pub output_name: String,
    pub processors: Vec<ExtractorBinding>,
    /// Secret phrase keying the `source_hash` BLAKE3 MAC (spec.md §3
    /// "hashphrase"). Indirected via `@/path` or `$ENV_VAR` in the INI file
    /// and resolved before this struct is constructed.
    pub hashphrase: String,
    pub truncate_text_at: Option<usize>,
    pub debug_row_limit: Option<usize>,
}

/// One row read from a source table, ready to be handed to an extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub key: SourceKey,
    pub text: String,
    pub copy_values: Vec<Option<String>>,
}

/// Outcome of one `nlprunner` invocation, printed at the end of a run
/// (spec.md §6 "RunSummary").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Option<String>,
    pub records_considered: u64,
    pub records_processed: u64,
    pub records_skipped_unchanged: u64,
    pub records_failed: u64,
    pub rows_written: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub fn started(run_id: RunId) -> Self {
        Self {
            run_id: Some(run_id.to_string()),
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn had_failures(&self) -> bool {
        self.records_failed > 0
    }
}
