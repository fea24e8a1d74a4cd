//! Pool construction over `sqlx::AnyPool` (spec.md §5: source/progress/
//! destination databases can each be a different dialect in the same run).
//!
//! `casparian_db::pool` picks a single *compile-time* concrete pool type
//! (`PgPool` xor `SqlitePool`) because a casparian deployment targets one
//! backend. nlprunner's `NlpDefinition` can reference sqlite, postgres and
//! mysql databases simultaneously within one INI config (source DBs,
//! progress DB, destination DB may all differ), so we use `sqlx::AnyPool`
//! here instead and accept the `#[derive(FromRow)]` ergonomics the teacher
//! traded away — see DESIGN.md for the full rationale.

use crate::error::DbError;
use std::sync::Once;
use tracing::info;

static INSTALL_DRIVERS: Once = Once::new();

fn ensure_drivers_installed() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

/// Which SQL dialect a configured database speaks, detected from its URL
/// scheme. Mirrors `nlprunner_protocol::SqlDialect` but only the three
/// dialects nlprunner can actually *connect to* (mssql/oracle are
/// NLPRP-declared dialects a remote processor may use, never a local
/// source/progress/destination database).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    Sqlite,
    Postgres,
    MySql,
}

impl DatabaseType {
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("sqlite:") {
            Some(Self::Sqlite)
        } else if url.starts_with("postgres:") || url.starts_with("postgresql:") {
            Some(Self::Postgres)
        } else if url.starts_with("mysql:") {
            Some(Self::MySql)
        } else {
            None
        }
    }

    fn feature_name(self) -> &'static str {
        match self {
            DatabaseType::Sqlite => "sqlite",
            DatabaseType::Postgres => "postgres",
            DatabaseType::MySql => "mysql",
        }
    }

    fn is_compiled_in(self) -> bool {
        match self {
            DatabaseType::Sqlite => cfg!(feature = "sqlite"),
            DatabaseType::Postgres => cfg!(feature = "postgres"),
            DatabaseType::MySql => cfg!(feature = "mysql"),
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseType::Sqlite => write!(f, "sqlite"),
            DatabaseType::Postgres => write!(f, "postgres"),
            DatabaseType::MySql => write!(f, "mysql"),
        }
    }
}

/// Database connection configuration for one configured database
/// (`[database:NAME]` section of the INI config, per spec.md §5).
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub db_type: DatabaseType,
    pub max_connections: u32,
}

impl DbConfig {
    pub fn from_url(url: impl Into<String>) -> Result<Self, DbError> {
        let url = url.into();
        let db_type = DatabaseType::from_url(&url).ok_or_else(|| DbError::InvalidUrl(url.clone()))?;
        Ok(Self {
            url,
            db_type,
            max_connections: match db_type {
                DatabaseType::Sqlite => 5,
                DatabaseType::Postgres => 10,
                DatabaseType::MySql => 10,
            },
        })
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }
}

pub type DbPool = sqlx::AnyPool;

/// Create a connection pool for `config`, applying backend-specific
/// settings (WAL mode for sqlite, per `casparian_db::pool`).
pub async fn create_pool(config: DbConfig) -> Result<DbPool, DbError> {
    if !config.db_type.is_compiled_in() {
        return Err(DbError::NotCompiled(config.db_type.feature_name().to_string()));
    }

    ensure_drivers_installed();

    let pool = sqlx::any::AnyPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;

    if config.db_type == DatabaseType::Sqlite {
        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous=NORMAL").execute(&pool).await?;
    }

    info!(db_type = %config.db_type, "connected to database");
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_dialect_from_url_scheme() {
        assert_eq!(DatabaseType::from_url("sqlite:./x.db"), Some(DatabaseType::Sqlite));
        assert_eq!(
            DatabaseType::from_url("postgresql://localhost/x"),
            Some(DatabaseType::Postgres)
        );
        assert_eq!(DatabaseType::from_url("mysql://localhost/x"), Some(DatabaseType::MySql));
        assert_eq!(DatabaseType::from_url("not-a-url"), None);
    }

    #[tokio::test]
    async fn creates_in_memory_sqlite_pool() {
        let config = DbConfig::from_url("sqlite::memory:").unwrap().with_max_connections(1);
        let pool = create_pool(config).await;
        assert!(pool.is_ok());
    }
}
