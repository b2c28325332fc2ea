use thiserror::Error;

/// Error taxonomy shared across the workspace. Variants map 1:1 onto the
/// HTTP status classes the server emits and the skip/abort decisions the
/// ingest orchestrator makes.
#[derive(Error, Debug)]
pub enum TidepoolError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Store transaction conflict: {0}")]
    Transaction(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl TidepoolError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}
