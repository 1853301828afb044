pub mod daemon;
pub mod dev_mode;
pub mod service;
pub mod status;
pub mod sync;

use colored::Colorize;

use chezmoi_sync_core::{Layout, SyncConfig};

/// Config for read-only commands: a broken file falls back to defaults so
/// `status` and `daemon logs` still work while the operator fixes it.
pub(crate) fn load_config_lenient(layout: &Layout) -> SyncConfig {
    match SyncConfig::load(layout) {
        Ok(config) => config,
        Err(err) => {
            eprintln!(
                "{} {err}; showing defaults",
                "warning:".yellow().bold()
            );
            SyncConfig::defaults(layout)
        }
    }
}
