//! Error types shared by NLPRP clients and servers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed NLPRP envelope: {0}")]
    MalformedEnvelope(String),

    #[error("unsupported protocol version: client={client}, server={server}")]
    UnsupportedVersion { client: String, server: String },

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("processor not found: {name} (version {version:?})")]
    ProcessorNotFound { name: String, version: Option<String> },

    #[error("processor '{name}' not permitted for this session")]
    ProcessorNotPermitted { name: String },

    #[error("queue entry not found: {0}")]
    QueueEntryNotFound(String),

    #[error("request exceeds max_records_per_request ({limit}): got {actual}")]
    TooManyRecords { limit: usize, actual: usize },

    #[error("request exceeds max_content_length ({limit} bytes): got {actual}")]
    ContentTooLarge { limit: usize, actual: usize },

    #[error("authentication failed")]
    Unauthenticated,

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
