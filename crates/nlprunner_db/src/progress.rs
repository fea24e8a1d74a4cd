//! The progress ledger: exactly-once / incremental processing state
//! (spec.md §4.1 "ProgressStore").
//!
//! Grounded in `casparian_sinks`'s `prepare()`/`commit()`/`rollback()`
//! lifecycle shape, adapted here to a single upsert-keyed table rather than
//! a registry of pluggable sinks.

use crate::error::DbError;
use crate::model::{ProgressEntry, SourceKey};
use crate::pool::DbPool;
use chrono::{DateTime, TimeZone, Utc};
use nlprunner_ids::RunId;
use sqlx::Row;
use tracing::debug;

pub const PROGRESS_TABLE: &str = "crate_nlp_progress";

/// Tracks which source records have already been processed for a given NLP
/// definition, keyed by `(nlp_definition, source_db, source_table,
/// source_pk_int, source_pk_str)`.
pub struct ProgressStore {
    pool: DbPool,
}

impl ProgressStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create the progress table if it doesn't already exist. Safe to call
    /// on every run; never drops or alters an existing table.
    pub async fn ensure_schema(&self) -> Result<(), DbError> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {PROGRESS_TABLE} (
                nlp_definition TEXT NOT NULL,
                source_db TEXT NOT NULL,
                source_table TEXT NOT NULL,
                source_pk_int BIGINT,
                source_pk_str TEXT,
                source_hash TEXT NOT NULL,
                when_processed_utc TEXT NOT NULL,
                run_id TEXT NOT NULL,
                PRIMARY KEY (nlp_definition, source_db, source_table, source_pk_int, source_pk_str)
            )"
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch the current progress entry for one source record, if any.
    pub async fn get(&self, key: &SourceKey) -> Result<Option<ProgressEntry>, DbError> {
        let row = sqlx::query(&format!(
            "SELECT source_hash, when_processed_utc, run_id FROM {PROGRESS_TABLE}
             WHERE nlp_definition = ? AND source_db = ? AND source_table = ?
               AND source_pk_int IS NOT DISTINCT FROM ? AND source_pk_str IS NOT DISTINCT FROM ?"
        ))
        .bind(&key.nlp_definition)
        .bind(&key.source_db)
        .bind(&key.source_table)
        .bind(key.source_pk_int)
        .bind(key.source_pk_str.clone())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let when_text: String = row.try_get("when_processed_utc")?;
        let when_processed_utc = parse_timestamp(&when_text)?;
        let run_id_text: String = row.try_get("run_id")?;
        let run_id = RunId::parse(&run_id_text).map_err(|e| DbError::Database(sqlx::Error::Decode(Box::new(e))))?;

        Ok(Some(ProgressEntry {
            key: key.clone(),
            source_hash: row.try_get("source_hash")?,
            when_processed_utc,
            run_id,
        }))
    }

    /// Record (or update) that `key` has been processed with the given
    /// content hash, as of `when` / `run_id`. Upsert semantics: a record
    /// reprocessed because its source changed simply overwrites its prior
    /// entry (spec.md §4.1 "incremental mode").
    pub async fn upsert(&self, entry: &ProgressEntry) -> Result<(), DbError> {
        let existing = self.get(&entry.key).await?;
        let when_text = entry.when_processed_utc.to_rfc3339();

        if existing.is_some() {
            sqlx::query(&format!(
                "UPDATE {PROGRESS_TABLE} SET source_hash = ?, when_processed_utc = ?, run_id = ?
                 WHERE nlp_definition = ? AND source_db = ? AND source_table = ?
                   AND source_pk_int IS NOT DISTINCT FROM ? AND source_pk_str IS NOT DISTINCT FROM ?"
            ))
            .bind(&entry.source_hash)
            .bind(&when_text)
            .bind(entry.run_id.as_str())
            .bind(&entry.key.nlp_definition)
            .bind(&entry.key.source_db)
            .bind(&entry.key.source_table)
            .bind(entry.key.source_pk_int)
            .bind(entry.key.source_pk_str.clone())
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(&format!(
                "INSERT INTO {PROGRESS_TABLE}
                 (nlp_definition, source_db, source_table, source_pk_int, source_pk_str, source_hash, when_processed_utc, run_id)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(&entry.key.nlp_definition)
            .bind(&entry.key.source_db)
            .bind(&entry.key.source_table)
            .bind(entry.key.source_pk_int)
            .bind(entry.key.source_pk_str.clone())
            .bind(&entry.source_hash)
            .bind(&when_text)
            .bind(entry.run_id.as_str())
            .execute(&self.pool)
            .await?;
        }

        debug!(nlp_definition = %entry.key.nlp_definition, "progress entry upserted");
        Ok(())
    }

    /// Delete progress entries for `nlp_definition`/`source_db`/
    /// `source_table` whose PK is not present in `present_pks` — run at the
    /// end of a full (non-`--skipdelete`) pass so rows removed from the
    /// source stop showing up as "already processed" (spec.md §4.1
    /// "deletion detection").
    pub async fn delete_absent_sources(
        &self,
        nlp_definition: &str,
        source_db: &str,
        source_table: &str,
        present_pks: &[SourceKey],
    ) -> Result<u64, DbError> {
        let present_ints: Vec<i64> = present_pks.iter().filter_map(|k| k.source_pk_int).collect();
        let present_strs: Vec<String> = present_pks.iter().filter_map(|k| k.source_pk_str.clone()).collect();

        let rows = sqlx::query(&format!(
            "SELECT source_pk_int, source_pk_str FROM {PROGRESS_TABLE}
             WHERE nlp_definition = ? AND source_db = ? AND source_table = ?"
        ))
        .bind(nlp_definition)
        .bind(source_db)
        .bind(source_table)
        .fetch_all(&self.pool)
        .await?;

        let mut deleted = 0u64;
        for row in rows {
            let pk_int: Option<i64> = row.try_get("source_pk_int")?;
            let pk_str: Option<String> = row.try_get("source_pk_str")?;

            let still_present = match (&pk_int, &pk_str) {
                (Some(i), _) => present_ints.contains(i),
                (None, Some(s)) => present_strs.contains(s),
                (None, None) => false,
            };

            if !still_present {
                sqlx::query(&format!(
                    "DELETE FROM {PROGRESS_TABLE}
                     WHERE nlp_definition = ? AND source_db = ? AND source_table = ?
                       AND source_pk_int IS NOT DISTINCT FROM ? AND source_pk_str IS NOT DISTINCT FROM ?"
                ))
                .bind(nlp_definition)
                .bind(source_db)
                .bind(source_table)
                .bind(pk_int)
                .bind(pk_str)
                .execute(&self.pool)
                .await?;
                deleted += 1;
            }
        }

        Ok(deleted)
    }
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            text.parse::<i64>()
                .map(|millis| Utc.timestamp_millis_opt(millis).single().unwrap_or_default())
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))
        })
        .map_err(DbError::Database)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{create_pool, DbConfig};

    async fn store() -> ProgressStore {
        let pool = create_pool(DbConfig::from_url("sqlite::memory:").unwrap().with_max_connections(1))
            .await
            .unwrap();
        let store = ProgressStore::new(pool);
        store.ensure_schema().await.unwrap();
        store
    }

    fn key(pk: i64) -> SourceKey {
        SourceKey {
            nlp_definition: "crp_finder".to_string(),
            source_db: "sourcedb".to_string(),
            source_table: "notes".to_string(),
            source_pk_int: Some(pk),
            source_pk_str: None,
            source_pk_field: "id".to_string(),
            source_text_field: "note_text".to_string(),
        }
    }

    #[tokio::test]
    async fn unknown_key_returns_none() {
        let store = store().await;
        assert!(store.get(&key(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let store = store().await;
        let entry = ProgressEntry {
            key: key(1),
            source_hash: "abc123".to_string(),
            when_processed_utc: Utc::now(),
            run_id: RunId::new(),
        };
        store.upsert(&entry).await.unwrap();

        let fetched = store.get(&key(1)).await.unwrap().unwrap();
        assert_eq!(fetched.source_hash, "abc123");
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_hash() {
        let store = store().await;
        let mut entry = ProgressEntry {
            key: key(1),
            source_hash: "v1".to_string(),
            when_processed_utc: Utc::now(),
            run_id: RunId::new(),
        };
        store.upsert(&entry).await.unwrap();

        entry.source_hash = "v2".to_string();
        store.upsert(&entry).await.unwrap();

        let fetched = store.get(&key(1)).await.unwrap().unwrap();
        assert_eq!(fetched.source_hash, "v2");
    }

    #[tokio::test]
    async fn delete_absent_sources_removes_missing_pks() {
        let store = store().await;
        for pk in [1, 2, 3] {
            store
                .upsert(&ProgressEntry {
                    key: key(pk),
                    source_hash: "h".to_string(),
                    when_processed_utc: Utc::now(),
                    run_id: RunId::new(),
                })
                .await
                .unwrap();
        }

        let deleted = store
            .delete_absent_sources("crp_finder", "sourcedb", "notes", &[key(1), key(3)])
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(store.get(&key(2)).await.unwrap().is_none());
        assert!(store.get(&key(1)).await.unwrap().is_some());
    }
}
