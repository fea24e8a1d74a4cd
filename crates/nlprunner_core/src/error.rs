use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("config error: {0}")]
    Config(String),

    #[error("nlp definition '{0}' references unknown input '{1}'")]
    UnknownInput(String, String),

    #[error("nlp definition '{0}' references unknown processor '{1}'")]
    UnknownProcessor(String, String),

    #[error("nlp definition '{0}' references unknown database '{1}'")]
    UnknownDatabase(String, String),

    #[error("nlp definition '{0}' references unknown output '{1}'")]
    UnknownOutput(String, String),

    #[error("secret indirection failed for '{0}': {1}")]
    SecretResolution(String, String),

    #[error(transparent)]
    Db(#[from] nlprunner_db::DbError),

    #[error(transparent)]
    Extractor(#[from] nlprunner_extractors::ExtractorError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
