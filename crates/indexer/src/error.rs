use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

/// Failure reported by a repository facade
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Connectivity problem expected to clear on a later attempt
    #[error("repository unavailable: {0}")]
    Transient(String),

    #[error("query failed: {0}")]
    Query(String),
}

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Malformed checkpoint {checkpoint:?}: {reason}")]
    MalformedCheckpoint { checkpoint: String, reason: String },

    #[error("Repository unavailable: {0}")]
    TransientRepository(String),

    #[error("Query error ({sql}): {source}")]
    Query {
        sql: String,
        #[source]
        source: RepositoryError,
    },

    #[error("Ancestry lookup failed ({sql}): {source}")]
    AncestryLookup {
        sql: String,
        #[source]
        source: RepositoryError,
    },

    #[error("Unexpected row shape: {0}")]
    RowShape(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl IndexerError {
    pub(crate) fn malformed(checkpoint: &str, reason: impl Into<String>) -> Self {
        Self::MalformedCheckpoint {
            checkpoint: checkpoint.to_string(),
            reason: reason.into(),
        }
    }
}
