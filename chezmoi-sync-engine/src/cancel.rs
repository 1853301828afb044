//! Two-stage cancellation shared between the daemon and blocking pipelines.
//!
//! `stop` asks pipelines to finish at the next adapter boundary; `kill`
//! additionally makes the subprocess runner terminate its current child.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::SyncError;

#[derive(Debug, Default)]
struct Flags {
    stop: AtomicBool,
    kill: AtomicBool,
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flags: Arc<Flags>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.flags.stop.store(true, Ordering::SeqCst);
    }

    /// Raises both flags.
    pub fn kill(&self) {
        self.flags.stop.store(true, Ordering::SeqCst);
        self.flags.kill.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flags.stop.load(Ordering::SeqCst)
    }

    pub fn is_killed(&self) -> bool {
        self.flags.kill.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once stop has been requested.
    pub fn check(&self) -> Result<(), SyncError> {
        if self.is_stopped() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}
