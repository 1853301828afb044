//! Error types for chezmoi-sync-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from identity, dev-mode, layout and checkpoint operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Run-record checkpoint could not be parsed.
    #[error("failed to parse state file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// JSON serialization error (write path).
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Configuration problems. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: malformed line (expected KEY=VALUE): {text}")]
    Syntax {
        path: PathBuf,
        line: usize,
        text: String,
    },

    #[error("{path}:{line}: invalid value for {key}: {reason}")]
    InvalidValue {
        path: PathBuf,
        line: usize,
        key: String,
        reason: String,
    },

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Convenience constructor for [`CoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}
