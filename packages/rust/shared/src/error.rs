//! Error types for the sanitize stage.
//!
//! Library crates use [`SanitizeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all stage operations.
#[derive(Debug, thiserror::Error)]
pub enum SanitizeError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Markup or payload parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Entity store read/write error.
    #[error("storage error: {0}")]
    Storage(String),

    /// The destination dataset could not be opened.
    #[error("store unavailable for dataset {dataset}: {message}")]
    StoreUnavailable { dataset: String, message: String },

    /// Buffered writes could not be made durable.
    #[error("flush failed: {0}")]
    Flush(String),

    /// Submitting or claiming a task failed.
    #[error("queue error: {0}")]
    Queue(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (missing id, malformed task, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SanitizeError>;

impl SanitizeError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a store-unavailable error for `dataset`.
    pub fn store_unavailable(dataset: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            dataset: dataset.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = SanitizeError::config("unknown region XX");
        assert_eq!(err.to_string(), "config error: unknown region XX");

        let err = SanitizeError::store_unavailable("leaks", "connection refused");
        assert_eq!(
            err.to_string(),
            "store unavailable for dataset leaks: connection refused"
        );

        let err = SanitizeError::Flush("disk full".into());
        assert!(err.to_string().contains("disk full"));
    }
}
