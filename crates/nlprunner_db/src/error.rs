use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid database URL: {0}")]
    InvalidUrl(String),

    #[error("database backend '{0}' not compiled in; rebuild with the matching feature")]
    NotCompiled(String),

    #[error("schema reconciliation failed for table '{table}': {reason}")]
    SchemaReconciliation { table: String, reason: String },

    #[error("refusing to drop column '{column}' on table '{table}' without --dropremake")]
    RefusedColumnDrop { table: String, column: String },

    #[error("row has no value for required progress key field '{0}'")]
    MissingKeyField(&'static str),
}
