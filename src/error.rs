use crate::embeddings::EmbedError;

/// Errors surfaced by the pattern bank
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pattern not found: {0}")]
    NotFound(String),

    #[error("No .patternbank directory found. Run 'patternbank init' first.")]
    NoBank,

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
