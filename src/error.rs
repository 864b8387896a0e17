//! Error types for lease file processing.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants.

use std::path::PathBuf;

/// Errors that can occur while loading and reconciling a lease file.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The lease file (or a config file) could not be opened or read.
    ///
    /// Fatal to the whole run. The caller decides how to report it.
    #[error("Can't open {}: {source}", path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A lease block carries an `ends` value that is neither a timestamp
    /// nor the literal `never`.
    #[error("Wrong value in ends for lease {address}: {value}")]
    MalformedLease { address: String, value: String },

    /// JSON serialization/deserialization error (config or JSON report).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration.
    ///
    /// Returned by [`Config::validate`](crate::Config::validate).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub(crate) fn file_access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileAccess {
            path: path.into(),
            source,
        }
    }
}

/// A specialized Result type for lease file operations.
pub type Result<T> = std::result::Result<T, Error>;
