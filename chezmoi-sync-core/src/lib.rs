//! chezmoi-sync core library: leaf components and the shared data model.
//!
//! - [`identity`]: machine identity store
//! - [`config`]: `KEY=VALUE` config loader
//! - [`dev_mode`]: dev-mode gate
//! - [`paths`]: on-disk layout
//! - [`run_record`]: run-record checkpoints
//! - [`types`]: directions, outcomes, run records

pub mod config;
pub mod dev_mode;
pub mod error;
pub mod identity;
pub mod paths;
pub mod run_record;
pub mod types;

pub use config::{LogFormat, SyncConfig};
pub use dev_mode::DevModeGate;
pub use error::{ConfigError, CoreError};
pub use paths::Layout;
pub use types::{
    Direction, ErrorCategory, InterlockHolder, MachineId, RunOutcome, RunRecord, SkipReason,
    StickyError, Trigger,
};
