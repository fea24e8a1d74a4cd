//! Storage-facing data shapes persisted by `ProgressStore` and
//! `DestinationWriter` (spec.md §3, §4.1).

use chrono::{DateTime, Utc};
use nlprunner_ids::RunId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identity of one source record, enough to locate it again on a later run.
/// String primary keys are additionally folded into a 63-bit integer
/// surrogate (spec.md §9 "string PK partitioning") so progress/partition
/// lookups stay index-friendly across all three backends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceKey {
    pub nlp_definition: String,
    pub source_db: String,
    pub source_table: String,
    pub source_pk_int: Option<i64>,
    pub source_pk_str: Option<String>,
    /// Source PK column name, carried through to the `_srcpkfield` standard
    /// output column (spec.md §6).
    pub source_pk_field: String,
    /// Source text column name, carried through to the `_srcfield` standard
    /// output column (spec.md §6).
    pub source_text_field: String,
}

impl SourceKey {
    /// The integer used for sharding and indexed lookups: the literal
    /// integer PK if present, else the string PK's surrogate.
    pub fn partition_key(&self) -> i64 {
        self.source_pk_int
            .unwrap_or_else(|| crate::partition::string_pk_surrogate(self.source_pk_str.as_deref().unwrap_or("")))
    }
}

/// One row of the progress ledger: did we process this source record, with
/// what content hash, and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub key: SourceKey,
    pub source_hash: String,
    pub when_processed_utc: DateTime<Utc>,
    pub run_id: RunId,
}

/// One extracted row ready to be written to the destination database,
/// tagged with the standard metadata columns injected by the `Controller`
/// (spec.md §4.1 "standard metadata columns").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRow {
    pub destination_table: String,
    pub fields: HashMap<String, serde_json::Value>,
    pub source_key: SourceKey,
    pub processor_name: String,
    pub processor_version: String,
    pub when_processed_utc: DateTime<Utc>,
}
