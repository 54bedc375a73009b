//! Error types shared across the crate.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error for fallible operations in the core.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        Error::Db(DbError::Query(error))
    }
}

/// Database layer failures.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Conversation and dispatch failures.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A clarifying question is already awaiting an answer on this thread.
    #[error("a question is already pending for thread {thread_id}")]
    QuestionPending { thread_id: String },

    #[error("outbound delivery failed: {0}")]
    Delivery(String),
}

/// Configuration problems detected at startup.
///
/// A missing credential is the only condition the daemon treats as fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("missing required credential: {0}")]
    MissingCredential(&'static str),
}
