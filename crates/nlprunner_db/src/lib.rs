//! Persistence layer for the NLP pipeline controller: the progress ledger
//! and the destination writer, over a shared `sqlx::AnyPool` so sources,
//! progress store and destination can each be sqlite, postgres or mysql
//! independently (spec.md §5).

pub mod destination;
pub mod error;
pub mod model;
pub mod partition;
pub mod pool;
pub mod progress;

pub use destination::{CommitThresholds, DestinationWriter, METADATA_COLUMNS};
pub use error::DbError;
pub use model::{ExtractionRow, ProgressEntry, SourceKey};
pub use partition::{shard_of, string_pk_surrogate};
pub use pool::{create_pool, DatabaseType, DbConfig, DbPool};
pub use progress::{ProgressStore, PROGRESS_TABLE};
