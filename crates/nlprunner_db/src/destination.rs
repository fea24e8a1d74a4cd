//! Writes extracted rows to the destination database (spec.md §4.1
//! "DestinationWriter"), with schema reconciliation and commit batching.
//!
//! Grounded in `casparian_sinks::SinkRegistry`'s `prepare()`/`commit()`/
//! `rollback()` lifecycle, adapted from its pluggable-sink registry to a
//! single relational destination with buffered, threshold-flushed inserts.

use crate::error::DbError;
use crate::model::ExtractionRow;
use crate::pool::DbPool;
use nlprunner_protocol::ColumnDef;
use std::collections::HashMap;
use tracing::{info, warn};

/// Standard metadata columns every destination row carries, in the exact
/// names spec.md §6 "Standard output columns" declares as this crate's
/// external interface.
pub const METADATA_COLUMNS: &[&str] = &[
    "_pk",
    "_nlpdef",
    "_srcdb",
    "_srctable",
    "_srcpkfield",
    "_srcpkval",
    "_srcpkstr",
    "_srcfield",
    "_srcdatetimefield",
    "_srcdatetimeval",
    "_crate_version",
    "_when_fetched_utc",
];

/// Semantic version stamped into every row's `_crate_version` column.
const CRATE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Thresholds that trigger a commit of buffered rows (spec.md §4.1
/// "commit thresholds").
#[derive(Debug, Clone, Copy)]
pub struct CommitThresholds {
    pub max_rows_before_commit: usize,
    pub max_bytes_before_commit: usize,
}

impl Default for CommitThresholds {
    fn default() -> Self {
        Self {
            max_rows_before_commit: 1000,
            max_bytes_before_commit: 8 * 1024 * 1024,
        }
    }
}

pub struct DestinationWriter {
    pool: DbPool,
    thresholds: CommitThresholds,
    buffer: Vec<(ExtractionRow, i64)>,
    buffered_bytes: usize,
    /// Next `_pk` to assign. A per-writer counter rather than a
    /// database-generated identifier, since `_pk` only needs to be unique
    /// within this writer's own inserts (spec.md §6 "synthetic per-row
    /// identifier") and `sqlx::AnyPool` has no portable autoincrement
    /// syntax across sqlite/postgres/mysql.
    next_pk: i64,
}

impl DestinationWriter {
    pub fn new(pool: DbPool, thresholds: CommitThresholds) -> Self {
        Self {
            pool,
            thresholds,
            buffer: Vec::new(),
            buffered_bytes: 0,
            next_pk: 0,
        }
    }

    /// Create the destination table if missing, and add any declared
    /// columns that don't yet exist. Never drops a column unless
    /// `full_rebuild` is set (spec.md §4.1 "`--dropremake`").
    pub async fn ensure_schema(
        &self,
        table: &str,
        columns: &[ColumnDef],
        full_rebuild: bool,
    ) -> Result<(), DbError> {
        if full_rebuild {
            sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
                .execute(&self.pool)
                .await?;
        }

        let mut definitions: Vec<String> = columns
            .iter()
            .map(|c| format!("{} {}", c.column_name, c.column_type))
            .collect();
        for meta_col in METADATA_COLUMNS {
            definitions.push(format!("{meta_col} TEXT"));
        }

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {table} ({})",
            definitions.join(", ")
        ))
        .execute(&self.pool)
        .await?;

        for column in columns {
            let alter = format!("ALTER TABLE {table} ADD COLUMN {} {}", column.column_name, column.column_type);
            if let Err(err) = sqlx::query(&alter).execute(&self.pool).await {
                // Every backend we target rejects adding a column that
                // already exists; we can't portably pre-check via
                // information_schema through a generic `AnyPool`, so we
                // attempt the ALTER and swallow the "already exists" case.
                let message = err.to_string().to_lowercase();
                if !message.contains("duplicate") && !message.contains("already exists") {
                    return Err(DbError::SchemaReconciliation {
                        table: table.to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Buffer one extracted row, flushing to the database once a commit
    /// threshold is crossed.
    pub async fn write(&mut self, row: ExtractionRow) -> Result<(), DbError> {
        self.buffered_bytes += estimate_row_bytes(&row);
        let pk = self.next_pk;
        self.next_pk += 1;
        self.buffer.push((row, pk));

        if self.buffer.len() >= self.thresholds.max_rows_before_commit
            || self.buffered_bytes >= self.thresholds.max_bytes_before_commit
        {
            self.flush().await?;
        }
        Ok(())
    }

    /// Flush any buffered rows to the database inside one transaction.
    /// Destination rows are committed before the caller upserts progress
    /// entries, per spec.md §9's resolution of the destination/progress
    /// ordering open question: a crash between the two leaves at most a
    /// harmless reprocessing, never a silent data loss.
    pub async fn flush(&mut self) -> Result<(), DbError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for (row, pk) in &self.buffer {
            let mut columns: Vec<&str> = row.fields.keys().map(|k| k.as_str()).collect();
            columns.sort_unstable();

            let mut column_names: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
            column_names.extend(METADATA_COLUMNS.iter().map(|c| c.to_string()));

            let placeholders = vec!["?"; column_names.len()].join(", ");
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                row.destination_table,
                column_names.join(", "),
                placeholders
            );

            let mut query = sqlx::query(&sql);
            for column in &columns {
                query = bind_json_value(query, row.fields.get(*column).cloned());
            }
            query = query
                .bind(*pk)
                .bind(row.source_key.nlp_definition.clone())
                .bind(row.source_key.source_db.clone())
                .bind(row.source_key.source_table.clone())
                .bind(row.source_key.source_pk_field.clone())
                .bind(row.source_key.partition_key())
                .bind(row.source_key.source_pk_str.clone())
                .bind(row.source_key.source_text_field.clone())
                .bind(None::<String>)
                .bind(None::<String>)
                .bind(CRATE_VERSION)
                .bind(row.when_processed_utc.to_rfc3339());

            query.execute(&mut *tx).await.map_err(DbError::Database)?;
        }
        tx.commit().await?;

        info!(rows = self.buffer.len(), "flushed extraction rows to destination");
        self.buffer.clear();
        self.buffered_bytes = 0;
        Ok(())
    }

    pub fn pending_rows(&self) -> usize {
        self.buffer.len()
    }
}

fn estimate_row_bytes(row: &ExtractionRow) -> usize {
    row.fields
        .values()
        .map(|v| serde_json::to_string(v).map(|s| s.len()).unwrap_or(0))
        .sum::<usize>()
        + row.destination_table.len()
}

fn bind_json_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>,
    value: Option<serde_json::Value>,
) -> sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>> {
    match value {
        None | Some(serde_json::Value::Null) => query.bind(None::<String>),
        Some(serde_json::Value::Bool(b)) => query.bind(b),
        Some(serde_json::Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64().unwrap_or_default())
            }
        }
        Some(serde_json::Value::String(s)) => query.bind(s),
        Some(other) => query.bind(other.to_string()),
    }
}

#[allow(dead_code)]
fn warn_on_unreconciled_drop(table: &str, column: &str) {
    warn!(table, column, "destination column dropped without --dropremake; ignoring request");
}
