use std::path::PathBuf;

use thiserror::Error;

use chezmoi_sync_core::{ConfigError, CoreError};
use chezmoi_sync_engine::SyncError;

/// Process exit code for configuration errors (`EX_CONFIG`).
pub const EXIT_CONFIG: i32 = 78;

/// Process exit code when `chezmoi` or `git` is missing.
pub const EXIT_TOOL_MISSING: i32 = 127;

/// Error surface for the daemon runtime and launchd management.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("required tool '{tool}' not found on PATH")]
    ToolMissing { tool: String },

    #[error("watch path {path} does not exist or is not a directory")]
    WatchPathMissing { path: PathBuf },

    #[error("{task} task failed: {reason}")]
    Task { task: &'static str, reason: String },

    #[error("launchd error: {0}")]
    Launchd(String),
}

impl DaemonError {
    /// Exit status for `daemon run`.
    pub fn exit_code(&self) -> i32 {
        match self {
            DaemonError::Config(_)
            | DaemonError::Core(CoreError::Config(_))
            | DaemonError::WatchPathMissing { .. } => EXIT_CONFIG,
            DaemonError::ToolMissing { .. }
            | DaemonError::Sync(SyncError::ToolMissing { .. }) => EXIT_TOOL_MISSING,
            _ => 1,
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_sysexits() {
        let config = DaemonError::Config(ConfigError::Invalid {
            key: "PULL_INTERVAL_SECONDS".into(),
            reason: "must be at least 1".into(),
        });
        assert_eq!(config.exit_code(), 78);
        assert_eq!(
            DaemonError::ToolMissing {
                tool: "chezmoi".into()
            }
            .exit_code(),
            127
        );
        assert_eq!(DaemonError::Launchd("boom".into()).exit_code(), 1);
    }
}
