//! Command payloads for the five NLPRP operations (spec.md §4.5 "Commands").

use crate::queue::QueueEntryStatus;
use crate::schema::ProcessorDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One unit of free text submitted for processing, with caller-supplied
/// metadata echoed back verbatim alongside its results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ContentItem {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Selects one processor (and optionally a specific version/args) to run
/// against each content item of a `process` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
}

impl ProcessorRequest {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            args: None,
        }
    }
}

/// `list_processors` has no body beyond the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "command")]
pub struct ListProcessorsRequest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListProcessorsResponse {
    pub processors: Vec<ProcessorDescriptor>,
}

/// `process`: run one or more processors over a batch of content, either
/// immediately or queued for later retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "command")]
pub struct ProcessRequest {
    pub content: Vec<ContentItem>,
    pub processors: Vec<ProcessorRequest>,
    #[serde(default)]
    pub queue: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_job_id: Option<String>,
}

/// Result of a single processor against a single content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorResult {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub success: bool,
    pub results: Vec<serde_json::Value>,
}

/// Results for one content item: the caller's metadata echoed back plus one
/// `ProcessorResult` per requested processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub processors: Vec<ProcessorResult>,
}

/// Immediate-mode response: results present directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResponseImmediate {
    pub results: Vec<ContentResult>,
}

/// Queued-mode response: the caller must `fetch_from_queue` using this id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResponseQueued {
    pub queue_id: String,
}

/// `process` may respond either immediately or with a queue handle,
/// depending on the request's `queue` flag and server policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProcessResponse {
    Immediate(ProcessResponseImmediate),
    Queued(ProcessResponseQueued),
}

/// `show_queue`: list this session's outstanding queue entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "command")]
pub struct ShowQueueRequest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntrySummary {
    pub queue_id: String,
    pub status: QueueEntryStatus,
    pub datetime_submitted: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime_completed: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowQueueResponse {
    pub queue: Vec<QueueEntrySummary>,
}

/// `fetch_from_queue`: retrieve (but do not delete) a completed entry's
/// results, or report that it is still busy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "command")]
pub struct FetchFromQueueRequest {
    pub queue_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FetchFromQueueResponse {
    Ready(ProcessResponseImmediate),
    Busy { status: QueueEntryStatus },
}

/// `delete_from_queue`: drop one entry, or (if `queue_id` is omitted) every
/// entry belonging to this session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "command")]
pub struct DeleteFromQueueRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteFromQueueResponse {
    pub deleted: Vec<String>,
}

/// The five top-level NLPRP commands, dispatched on over the wire by the
/// `command` discriminant (spec.md §4.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    ListProcessors,
    Process {
        content: Vec<ContentItem>,
        processors: Vec<ProcessorRequest>,
        #[serde(default)]
        queue: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_job_id: Option<String>,
    },
    ShowQueue,
    FetchFromQueue {
        queue_id: String,
    },
    DeleteFromQueue {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        queue_id: Option<String>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::ListProcessors => "list_processors",
            Command::Process { .. } => "process",
            Command::ShowQueue => "show_queue",
            Command::FetchFromQueue { .. } => "fetch_from_queue",
            Command::DeleteFromQueue { .. } => "delete_from_queue",
        }
    }
}

/// Per-user allowance: which processors a session may invoke, checked
/// before any command body beyond `list_processors` is interpreted
/// (spec.md §4.5 "Access control").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorPermissions(pub HashMap<String, bool>);

impl ProcessorPermissions {
    pub fn allow_all() -> Self {
        Self(HashMap::new())
    }

    pub fn is_allowed(&self, processor_name: &str) -> bool {
        self.0.get(processor_name).copied().unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_tag_round_trips() {
        let cmd = Command::Process {
            content: vec![ContentItem::new("CRP 45 mg/L")],
            processors: vec![ProcessorRequest::named("crp_finder")],
            queue: false,
            client_job_id: None,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        let decoded: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, cmd);
        assert_eq!(cmd.name(), "process");
    }

    #[test]
    fn list_processors_has_no_extra_fields() {
        let cmd = Command::ListProcessors;
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value, serde_json::json!({"command": "list_processors"}));
    }

    #[test]
    fn fetch_from_queue_distinguishes_busy_from_ready() {
        let busy = FetchFromQueueResponse::Busy {
            status: QueueEntryStatus::Busy,
        };
        let json = serde_json::to_string(&busy).unwrap();
        let decoded: FetchFromQueueResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, busy);
    }

    #[test]
    fn permissions_default_to_allow_when_unlisted() {
        let perms = ProcessorPermissions::allow_all();
        assert!(perms.is_allowed("anything"));
    }

    #[test]
    fn permissions_deny_when_explicitly_false() {
        let mut map = HashMap::new();
        map.insert("restricted_finder".to_string(), false);
        let perms = ProcessorPermissions(map);
        assert!(!perms.is_allowed("restricted_finder"));
        assert!(perms.is_allowed("other_finder"));
    }
}
