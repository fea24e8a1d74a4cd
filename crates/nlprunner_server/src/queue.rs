//! In-memory queue store backing `process{queue:true}` / `show_queue` /
//! `fetch_from_queue` / `delete_from_queue` (spec.md §4.5). Grounded in
//! the teacher's sentinel queue bookkeeping (job descriptors tracked by
//! id, polled by the submitter rather than pushed), adapted from ZMQ
//! control messages to HTTP request/response.
//!
//! Entries are partitioned by `SessionId` so `show_queue` can never leak
//! another session's work, matching spec.md's per-session isolation
//! requirement for the queued NLPRP surface.

use chrono::{DateTime, Utc};
use nlprunner_ids::{QueueId, SessionId};
use nlprunner_protocol::{ProcessResponseImmediate, ProtocolError, QueueEntryStatus, QueueEntrySummary};
use std::collections::HashMap;
use tokio::sync::RwLock;

struct QueueEntry {
    owner: SessionId,
    status: QueueEntryStatus,
    submitted_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    result: Option<ProcessResponseImmediate>,
}

/// Holds every session's queued `process` requests until they are fetched
/// or deleted. A queue worker (spawned by the server's router setup) pops
/// entries in arrival order and fills in `result` as processors finish.
#[derive(Default)]
pub struct QueueStore {
    entries: RwLock<HashMap<String, QueueEntry>>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn submit(&self, owner: SessionId) -> QueueId {
        let queue_id = QueueId::new();
        let entry = QueueEntry {
            owner,
            status: QueueEntryStatus::Busy,
            submitted_at: Utc::now(),
            completed_at: None,
            result: None,
        };
        self.entries.write().await.insert(queue_id.as_str().to_string(), entry);
        queue_id
    }

    pub async fn complete(&self, queue_id: &str, result: ProcessResponseImmediate) {
        if let Some(entry) = self.entries.write().await.get_mut(queue_id) {
            entry.status = QueueEntryStatus::Ready;
            entry.completed_at = Some(Utc::now());
            entry.result = Some(result);
        }
    }

    pub async fn show_queue(&self, owner: &SessionId) -> Vec<QueueEntrySummary> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|(_, entry)| &entry.owner == owner)
            .map(|(queue_id, entry)| QueueEntrySummary {
                queue_id: queue_id.clone(),
                status: entry.status,
                datetime_submitted: entry.submitted_at.to_rfc3339(),
                datetime_completed: entry.completed_at.map(|t| t.to_rfc3339()),
            })
            .collect()
    }

    pub async fn fetch(&self, owner: &SessionId, queue_id: &str) -> Result<(QueueEntryStatus, Option<ProcessResponseImmediate>), ProtocolError> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(queue_id)
            .filter(|e| &e.owner == owner)
            .ok_or_else(|| ProtocolError::QueueEntryNotFound(queue_id.to_string()))?;
        Ok((entry.status, entry.result.clone()))
    }

    /// Deletes one entry (`Some(queue_id)`) or every entry owned by
    /// `owner` (`None`), returning the ids actually removed.
    pub async fn delete(&self, owner: &SessionId, queue_id: Option<&str>) -> Result<Vec<String>, ProtocolError> {
        let mut entries = self.entries.write().await;
        match queue_id {
            Some(id) => {
                if entries.get(id).filter(|e| &e.owner == owner).is_none() {
                    return Err(ProtocolError::QueueEntryNotFound(id.to_string()));
                }
                entries.remove(id);
                Ok(vec![id.to_string()])
            }
            None => {
                let ids: Vec<String> = entries
                    .iter()
                    .filter(|(_, entry)| &entry.owner == owner)
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in &ids {
                    entries.remove(id);
                }
                Ok(ids)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queue_entry_starts_busy_then_completes() {
        let store = QueueStore::new();
        let owner = SessionId::new();
        let queue_id = store.submit(owner.clone()).await;

        let (status, result) = store.fetch(&owner, queue_id.as_str()).await.unwrap();
        assert_eq!(status, QueueEntryStatus::Busy);
        assert!(result.is_none());

        store.complete(queue_id.as_str(), ProcessResponseImmediate { results: Vec::new() }).await;
        let (status, result) = store.fetch(&owner, queue_id.as_str()).await.unwrap();
        assert_eq!(status, QueueEntryStatus::Ready);
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn fetch_from_another_session_is_not_found() {
        let store = QueueStore::new();
        let owner = SessionId::new();
        let other = SessionId::new();
        let queue_id = store.submit(owner).await;

        assert!(matches!(
            store.fetch(&other, queue_id.as_str()).await,
            Err(ProtocolError::QueueEntryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_all_only_removes_owned_entries() {
        let store = QueueStore::new();
        let owner = SessionId::new();
        let other = SessionId::new();
        let mine = store.submit(owner.clone()).await;
        let theirs = store.submit(other.clone()).await;

        let deleted = store.delete(&owner, None).await.unwrap();
        assert_eq!(deleted, vec![mine.as_str().to_string()]);
        assert!(store.fetch(&other, theirs.as_str()).await.is_ok());
    }
}
