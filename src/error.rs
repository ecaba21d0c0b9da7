//! Error types for sqlq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No item was available under the requested blocking policy.
    #[error("queue is empty")]
    Empty,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Connectivity or backing-store fault. Never retried by the engine.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Unique payload constraint violated. `put` on a unique queue absorbs this.
    #[error("unique constraint violated")]
    ConstraintViolation,

    #[error("record not found: {0}")]
    NotFound(i64),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Error::ConstraintViolation
            }
            other => Error::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => Error::ConstraintViolation,
            other => Error::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::StoreUnavailable(e.to_string())
    }
}
