//! NLPRP: the wire protocol spoken between `RemoteExtractor` clients and the
//! optional nlprunner NLPRP server (spec.md §4.5).
//!
//! This crate owns only the message shapes and pure helpers (schema
//! validation, keyed source hashing). Transport (HTTP client/server) lives
//! in `nlprunner_extractors` and `nlprunner_server` respectively.

pub mod commands;
pub mod envelope;
pub mod error;
pub mod hash;
pub mod queue;
pub mod schema;

pub use commands::{
    Command, ContentItem, ContentResult, DeleteFromQueueRequest, DeleteFromQueueResponse,
    FetchFromQueueRequest, FetchFromQueueResponse, ListProcessorsRequest, ListProcessorsResponse,
    ProcessRequest, ProcessResponse, ProcessResponseImmediate, ProcessResponseQueued,
    ProcessorPermissions, ProcessorRequest, ProcessorResult, QueueEntrySummary, ShowQueueRequest,
    ShowQueueResponse,
};
pub use envelope::{ErrorDetail, ProtocolInfo, Request, Response, ResponseStatus, ServerInfo};
pub use error::ProtocolError;
pub use hash::{canonicalize_copy_values, compute_source_hash, HashKey, SourceHash};
pub use queue::{PendingRequest, QueueEntryStatus};
pub use schema::{ColumnDef, ProcessorDescriptor, SchemaType, SchemaViolation, SqlDialect, TabularSchema};
