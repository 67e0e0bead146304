//! Error types for the library layer.
//!
//! Only conditions that abort a whole operation live here. Row and batch
//! failures during a load are values in the load summary
//! ([`LoadFailure`](crate::models::LoadFailure)), and a cache miss is `None`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EtlError {
    /// Staging file missing, unreadable, or not valid gzip.
    #[error("cannot read staging file {}: {source}", path.display())]
    FatalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The CSV header could not be read.
    #[error("malformed CSV header in {}: {message}", path.display())]
    Header { path: PathBuf, message: String },

    /// Configuration does not line up with the data (e.g. missing header).
    #[error("configuration error: {0}")]
    Config(String),

    /// The load target rejected a whole-table operation (e.g. truncate).
    #[error("target write failed: {0}")]
    Sink(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Cache invalidation pattern is not a valid regex.
    #[error("invalid invalidation pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("no queued review for UEI '{0}'")]
    ReviewNotFound(String),
}

pub type Result<T> = std::result::Result<T, EtlError>;

impl EtlError {
    pub fn fatal_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EtlError::FatalIo {
            path: path.into(),
            source,
        }
    }
}
