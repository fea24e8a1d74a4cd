//! Queue entry descriptors shared between the NLPRP client and server
//! (spec.md §4.5 "show_queue" / "fetch_from_queue").

use serde::{Deserialize, Serialize};

/// Lifecycle state of one queued `process` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueEntryStatus {
    /// Submitted but not yet finished; `fetch_from_queue` will report busy.
    Busy,
    /// Finished; results are available via `fetch_from_queue`.
    Ready,
}

impl QueueEntryStatus {
    pub fn is_ready(self) -> bool {
        matches!(self, QueueEntryStatus::Ready)
    }
}

/// What the client-side queue tracker persists for one in-flight remote
/// request, so a crashed/restarted run can resume polling instead of
/// resubmitting (spec.md §4.3 RemoteExtractor queued-mode bookkeeping).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub queue_id: String,
    /// Source record identities in submission order, so fetched results can
    /// be re-associated with the `SourceRecord`s that produced them.
    pub record_identities: Vec<String>,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
    pub tries: u32,
}

impl PendingRequest {
    pub fn new(queue_id: impl Into<String>, record_identities: Vec<String>) -> Self {
        Self {
            queue_id: queue_id.into(),
            record_identities,
            submitted_at: chrono::Utc::now(),
            tries: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_status_reports_ready() {
        assert!(QueueEntryStatus::Ready.is_ready());
        assert!(!QueueEntryStatus::Busy.is_ready());
    }

    #[test]
    fn pending_request_round_trips_through_json() {
        let pending = PendingRequest::new("q-1", vec!["rid-1".to_string(), "rid-2".to_string()]);
        let json = serde_json::to_string(&pending).unwrap();
        let decoded: PendingRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.queue_id, "q-1");
        assert_eq!(decoded.record_identities.len(), 2);
    }
}
