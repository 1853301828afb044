//! Commit-message composition from `COMMIT_MESSAGE_TEMPLATE`.

use chrono::{DateTime, TimeZone};

use chezmoi_sync_core::MachineId;

/// Paths listed verbatim before the remainder is summarised.
pub const MAX_LISTED_PATHS: usize = 5;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// `a, b, c, d, e (+N more)`; `no changes` for an empty list.
pub fn summarize_paths(paths: &[String]) -> String {
    if paths.is_empty() {
        return "no changes".to_string();
    }
    let listed = paths
        .iter()
        .take(MAX_LISTED_PATHS)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    if paths.len() > MAX_LISTED_PATHS {
        format!("{listed} (+{} more)", paths.len() - MAX_LISTED_PATHS)
    } else {
        listed
    }
}

/// Substitute `{machine}`, `{timestamp}` and `{files}` in `template`.
pub fn compose<Tz>(template: &str, machine: &MachineId, at: &DateTime<Tz>, paths: &[String]) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    template
        .replace("{machine}", &machine.0)
        .replace("{timestamp}", &at.format(TIMESTAMP_FORMAT).to_string())
        .replace("{files}", &summarize_paths(paths))
}
