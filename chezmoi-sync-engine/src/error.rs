//! Error types for chezmoi-sync-engine.

use std::path::PathBuf;

use thiserror::Error;

use chezmoi_sync_core::{CoreError, ErrorCategory};

/// Errors raised by the control plane. Pipelines fold these into a
/// [`chezmoi_sync_core::RunOutcome`] via [`SyncError::category`].
#[derive(Debug, Error)]
pub enum SyncError {
    /// State-directory error from the core crate.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `chezmoi` or `git` could not be spawned.
    #[error("required tool '{tool}' not found on PATH")]
    ToolMissing { tool: String },

    /// A subprocess ran but failed in a way no classifier recognised.
    #[error("{tool} {args} failed (status {status}): {stderr}")]
    Tool {
        tool: String,
        args: String,
        status: String,
        stderr: String,
    },

    /// The cancel token's kill flag terminated a subprocess.
    #[error("{tool} was killed during shutdown")]
    Killed { tool: String },

    /// The stop flag was observed between adapter calls.
    #[error("cancelled")]
    Cancelled,

    /// Lock-file contents could not be decoded.
    #[error("interlock file {path} is malformed: {source}")]
    LockFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl SyncError {
    /// Map onto the shared error taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::ToolMissing { .. } => ErrorCategory::ExternalToolMissing,
            SyncError::Core(CoreError::Config(_)) => ErrorCategory::ConfigInvalid,
            SyncError::Core(_) | SyncError::Io { .. } | SyncError::LockFile { .. } => {
                ErrorCategory::Transient
            }
            SyncError::Tool { .. } | SyncError::Killed { .. } | SyncError::Cancelled => {
                ErrorCategory::AdapterAbort
            }
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
