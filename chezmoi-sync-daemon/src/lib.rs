//! chezmoi-sync daemon runtime: source-tree watcher, push reactor, pull
//! timer, log rotation and launchd service management.

mod error;
pub mod launchd;
pub mod log_rotation;
pub mod logging;
pub mod paths;
pub mod reactor;
mod runtime;
pub mod watcher;

pub use error::{DaemonError, EXIT_CONFIG, EXIT_TOOL_MISSING};
pub use launchd::{
    generate_plist, install as install_launchd, uninstall as uninstall_launchd, ManifestSpec,
    ServiceState,
};
pub use logging::init_tracing;
pub use runtime::{run, run_with, start_blocking, DaemonOptions, DirectionSelection};
