use std::path::{Path, PathBuf};
use std::time::Duration;

use chezmoi_sync_core::Direction;

pub const PUSH_LABEL: &str = "com.chezmoi.sync.push";
pub const PULL_LABEL: &str = "com.chezmoi.sync.pull";

/// Agents installed by the shell scripts this tool replaced.
pub const LEGACY_LABELS: [&str; 2] = ["com.chezmoi.autopush", "com.chezmoi.autopull"];

/// Events are ignored for this long after the pull direction released the interlock.
pub const PULL_MUTE_WINDOW: Duration = Duration::from_secs(2);

/// How often the rotation task checks log sizes.
pub const LOG_ROTATION_INTERVAL: Duration = Duration::from_secs(60);

pub fn service_label(direction: Direction) -> &'static str {
    match direction {
        Direction::Push => PUSH_LABEL,
        Direction::Pull => PULL_LABEL,
    }
}

pub fn launch_agents_dir(home: &Path) -> PathBuf {
    home.join("Library").join("LaunchAgents")
}

pub fn plist_path(home: &Path, direction: Direction) -> PathBuf {
    launch_agents_dir(home).join(format!("{}.plist", service_label(direction)))
}
