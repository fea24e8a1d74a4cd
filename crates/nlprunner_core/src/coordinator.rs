//! Splits one NLP definition's source rows across N sibling worker
//! processes by disjoint PK partition (spec.md §7 "Coordinator").
//!
//! Each sibling is an independent `nlprunner` invocation sharing the same
//! config and `--nprocesses N --process i` flags; this module only carries
//! the shard-selection arithmetic the `Planner` uses, not the process
//! supervision itself (each shard is its own OS process, not a thread this
//! binary manages).

use crate::model::RunSummary;
use crate::planner::ShardSelector;

/// Describes one shard's share of the work, derived from `--process i
/// --nprocesses N` (spec.md §7).
#[derive(Debug, Clone, Copy)]
pub struct ShardAssignment {
    pub shard_index: u32,
    pub shard_count: u32,
}

impl ShardAssignment {
    pub fn new(shard_index: u32, shard_count: u32) -> Result<Self, String> {
        if shard_count == 0 {
            return Err("--nprocesses must be at least 1".to_string());
        }
        if shard_index >= shard_count {
            return Err(format!("--process {shard_index} must be less than --nprocesses {shard_count}"));
        }
        Ok(Self { shard_index, shard_count })
    }

    pub fn selector(&self) -> ShardSelector {
        ShardSelector {
            shard_index: self.shard_index,
            shard_count: self.shard_count,
        }
    }

    pub fn is_single_shard(&self) -> bool {
        self.shard_count <= 1
    }
}

/// Merge the `RunSummary`s produced by each shard's `Controller::run` into
/// one aggregate total, for callers (tests, or a future supervising
/// process) that run every shard in-process rather than as true siblings.
pub fn merge_summaries(summaries: Vec<RunSummary>) -> RunSummary {
    let mut merged = RunSummary::default();
    for summary in summaries {
        merged.records_considered += summary.records_considered;
        merged.records_processed += summary.records_processed;
        merged.records_skipped_unchanged += summary.records_skipped_unchanged;
        merged.records_failed += summary.records_failed;
        merged.rows_written += summary.rows_written;
        merged.started_at = earliest(merged.started_at, summary.started_at);
        merged.finished_at = latest(merged.finished_at, summary.finished_at);
    }
    merged
}

fn earliest(a: Option<chrono::DateTime<chrono::Utc>>, b: Option<chrono::DateTime<chrono::Utc>>) -> Option<chrono::DateTime<chrono::Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn latest(a: Option<chrono::DateTime<chrono::Utc>>, b: Option<chrono::DateTime<chrono::Utc>>) -> Option<chrono::DateTime<chrono::Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_shard_count() {
        assert!(ShardAssignment::new(0, 0).is_err());
    }

    #[test]
    fn rejects_index_out_of_range() {
        assert!(ShardAssignment::new(3, 3).is_err());
    }

    #[test]
    fn accepts_valid_assignment() {
        let assignment = ShardAssignment::new(1, 4).unwrap();
        assert_eq!(assignment.selector().shard_index, 1);
        assert!(!assignment.is_single_shard());
    }

    #[test]
    fn merge_sums_counts_across_shards() {
        let a = RunSummary { records_processed: 5, ..Default::default() };
        let b = RunSummary { records_processed: 7, ..Default::default() };
        let merged = merge_summaries(vec![a, b]);
        assert_eq!(merged.records_processed, 12);
    }
}
