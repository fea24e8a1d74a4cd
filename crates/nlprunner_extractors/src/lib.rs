//! Extractor implementations: in-process regex finders, an external
//! line-oriented co-process, and a remote NLPRP HTTP client (spec.md §4.2,
//! §4.3, §4.4).

pub mod coprocess;
pub mod error;
pub mod regex;
pub mod registry;
pub mod remote;

pub use error::ExtractorError;
pub use registry::{Extractor, ExtractorFactory, ExtractorRegistry};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One unit of text submitted to an `Extractor`, carrying just enough
/// identity for the caller to re-associate results with its own
/// `SourceRecord` bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionInput {
    pub record_id: String,
    pub text: String,
}

/// One candidate output row, destined for one destination table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRow {
    pub table: String,
    pub fields: HashMap<String, serde_json::Value>,
}

/// The result of running one extractor over one `ExtractionInput`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub record_id: String,
    pub rows: Vec<FieldRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractionOutcome {
    pub fn success(record_id: impl Into<String>, rows: Vec<FieldRow>) -> Self {
        Self {
            record_id: record_id.into(),
            rows,
            error: None,
        }
    }

    pub fn failure(record_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            rows: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
