//! Pull-based batch planner (spec.md §9 re-architecture: a `next_batch`
//! planner replacing a generator/iterator chain). The `Controller` calls
//! `next_batch` repeatedly; the planner owns paging state and PK ordering.

use crate::error::CoreError;
use crate::model::{InputFieldSpec, NlpDefinition, SourceRecord};
use nlprunner_db::{shard_of, string_pk_surrogate, SourceKey};
use sqlx::any::AnyPool;
use sqlx::Row;

/// Whether the planner reads every source row or only rows whose progress
/// entry is missing/stale (spec.md §4.1 "incremental vs full mode").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    Full,
    Incremental,
}

/// Restricts a run to one shard of `shard_count` (spec.md §7
/// "Coordinator"). `shard_count == 1` processes every row.
#[derive(Debug, Clone, Copy)]
pub struct ShardSelector {
    pub shard_index: u32,
    pub shard_count: u32,
}

impl ShardSelector {
    pub fn single() -> Self {
        Self { shard_index: 0, shard_count: 1 }
    }

    fn accepts(&self, partition_key: i64) -> bool {
        shard_of(partition_key, self.shard_count) == self.shard_index
    }
}

/// Pages through one `[input:NAME]` source table in ascending PK order.
pub struct Planner {
    pool: AnyPool,
    input: InputFieldSpec,
    nlp_definition_name: String,
    mode: PlanMode,
    shard: ShardSelector,
    debug_row_limit: Option<usize>,
    truncate_text_at: Option<usize>,
    last_pk: Option<SourceKey>,
    rows_emitted: usize,
    exhausted: bool,
}

impl Planner {
    pub fn new(pool: AnyPool, input: InputFieldSpec, nlp_definition: &NlpDefinition, mode: PlanMode, shard: ShardSelector) -> Self {
        Self {
            pool,
            input,
            nlp_definition_name: nlp_definition.name.clone(),
            mode,
            shard,
            debug_row_limit: nlp_definition.debug_row_limit,
            truncate_text_at: nlp_definition.truncate_text_at,
            last_pk: None,
            rows_emitted: 0,
            exhausted: false,
        }
    }

    /// Pull the next page, bounded by `max_rows`. Returns an empty vec when
    /// the source is exhausted or `debug_row_limit` has been reached.
    pub async fn next_batch(&mut self, max_rows: usize) -> Result<Vec<SourceRecord>, CoreError> {
        if self.exhausted {
            return Ok(Vec::new());
        }
        if let Some(limit) = self.debug_row_limit {
            if self.rows_emitted >= limit {
                self.exhausted = true;
                return Ok(Vec::new());
            }
        }

        let page_size = self
            .debug_row_limit
            .map(|limit| max_rows.min(limit.saturating_sub(self.rows_emitted)))
            .unwrap_or(max_rows)
            .max(1);

        let mut sql = format!(
            "SELECT {pk}, {text} {copy_select} FROM {table} WHERE 1=1",
            pk = self.input.source_pk_field,
            text = self.input.source_text_field,
            copy_select = self
                .input
                .copy_fields
                .iter()
                .map(|f| format!(", {f}"))
                .collect::<String>(),
            table = self.input.source_table,
        );

        if let Some(where_clause) = &self.input.source_where {
            sql.push_str(&format!(" AND ({where_clause})"));
        }
        if let Some(last) = &self.last_pk {
            if let Some(pk_int) = last.source_pk_int {
                sql.push_str(&format!(" AND {} > {}", self.input.source_pk_field, pk_int));
            }
        }
        sql.push_str(&format!(" ORDER BY {} ASC LIMIT {}", self.input.source_pk_field, page_size));

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await.map_err(nlprunner_db::DbError::Database)?;

        if rows.is_empty() {
            self.exhausted = true;
            return Ok(Vec::new());
        }

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let pk_int: i64 = row.try_get(self.input.source_pk_field.as_str()).map_err(nlprunner_db::DbError::Database)?;
            let mut text: String = row.try_get(self.input.source_text_field.as_str()).map_err(nlprunner_db::DbError::Database)?;
            if let Some(max_len) = self.truncate_text_at {
                text.truncate(max_len);
            }

            let copy_values: Vec<Option<String>> = self
                .input
                .copy_fields
                .iter()
                .map(|f| row.try_get::<Option<String>, _>(f.as_str()).unwrap_or(None))
                .collect();

            let key = SourceKey {
                nlp_definition: self.nlp_definition_name.clone(),
                source_db: self.input.source_db.clone(),
                source_table: self.input.source_table.clone(),
                source_pk_int: Some(pk_int),
                source_pk_str: None,
                source_pk_field: self.input.source_pk_field.clone(),
                source_text_field: self.input.source_text_field.clone(),
            };

            self.last_pk = Some(key.clone());

            if !self.shard.accepts(key.partition_key()) {
                continue;
            }

            records.push(SourceRecord { key, text, copy_values });
        }

        self.rows_emitted += records.len();
        if rows.len() < page_size {
            self.exhausted = true;
        }
        Ok(records)
    }

    /// Fold a string PK into its partition surrogate (spec.md §9 "string PK
    /// partitioning"), used when a source table's PK column is non-integer.
    pub fn string_key(&self, pk: &str) -> SourceKey {
        SourceKey {
            nlp_definition: self.nlp_definition_name.clone(),
            source_db: self.input.source_db.clone(),
            source_table: self.input.source_table.clone(),
            source_pk_int: None,
            source_pk_str: Some(pk.to_string()),
            source_pk_field: self.input.source_pk_field.clone(),
            source_text_field: self.input.source_text_field.clone(),
        }
    }

    pub fn mode(&self) -> PlanMode {
        self.mode
    }
}

#[allow(dead_code)]
fn string_pk_shard_key(pk: &str) -> i64 {
    string_pk_surrogate(pk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_shard_selector_accepts_everything() {
        let shard = ShardSelector::single();
        assert!(shard.accepts(0));
        assert!(shard.accepts(-5));
        assert!(shard.accepts(999));
    }

    #[test]
    fn multi_shard_selector_only_accepts_its_own_partition() {
        let shard = ShardSelector { shard_index: 1, shard_count: 3 };
        for pk in 0..9 {
            let accepted = shard.accepts(pk);
            assert_eq!(accepted, pk.rem_euclid(3) == 1);
        }
    }
}
