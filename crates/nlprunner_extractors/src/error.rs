use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("extractor '{0}' not found")]
    NotFound(String),

    #[error("invalid extractor configuration: {0}")]
    Config(String),

    #[error("extractor '{name}' version '{version}' not found")]
    VersionNotFound { name: String, version: String },

    #[error("co-process '{0}' exited unexpectedly")]
    ProcessCrashed(String),

    #[error("co-process '{0}' timed out waiting for a response")]
    Timeout(String),

    #[error("co-process '{0}' produced malformed output: {1}")]
    MalformedOutput(String, String),

    #[error("io error talking to co-process '{0}': {1}")]
    Io(String, #[source] std::io::Error),

    #[error("remote NLPRP request failed: {0}")]
    Remote(#[from] reqwest::Error),

    #[error("remote NLPRP server returned an error: {0}")]
    RemoteProtocol(String),

    #[error("remote NLPRP request exceeded max_tries ({0})")]
    MaxTriesExceeded(u32),

    #[error(transparent)]
    Protocol(#[from] nlprunner_protocol::ProtocolError),
}
