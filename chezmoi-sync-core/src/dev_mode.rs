//! Dev-mode gate: an empty sentinel file whose presence disables automated sync.

use std::path::{Path, PathBuf};

use crate::error::{io_err, CoreError};
use crate::paths::ensure_dir;

#[derive(Debug, Clone)]
pub struct DevModeGate {
    path: PathBuf,
}

impl DevModeGate {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Presence check. Cheap enough to call before every adapter call.
    pub fn is_enabled(&self) -> bool {
        self.path.exists()
    }

    /// Create or remove the sentinel. Both directions are idempotent.
    pub fn set(&self, enabled: bool) -> Result<(), CoreError> {
        if enabled {
            self.enable()
        } else {
            self.disable()
        }
    }

    fn enable(&self) -> Result<(), CoreError> {
        if self.path.exists() {
            return Ok(());
        }
        if let Some(dir) = self.path.parent() {
            ensure_dir(dir)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, b"").map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&self.path, e));
        }
        tracing::info!(path = %self.path.display(), "dev-mode enabled");
        Ok(())
    }

    fn disable(&self) -> Result<(), CoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "dev-mode disabled");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(&self.path, err)),
        }
    }
}
