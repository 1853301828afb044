//! Domain types shared by every chezmoi-sync crate.
//!
//! All path fields use `PathBuf`; timestamps are `DateTime<Utc>`.
//! Everything that is persisted or reported is serde-serializable.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// The stable per-host label written into commit messages.
///
/// Always a fixed point of [`crate::identity::normalize`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MachineId(pub String);

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for MachineId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Direction / trigger
// ---------------------------------------------------------------------------

/// One of the two sync directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Push,
    Pull,
}

impl Direction {
    pub fn all() -> &'static [Direction] {
        &[Direction::Push, Direction::Pull]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Push => "push",
            Direction::Pull => "pull",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "push" => Ok(Direction::Push),
            "pull" => Ok(Direction::Pull),
            other => Err(format!("unknown direction '{other}'; expected: push, pull")),
        }
    }
}

/// What started a pipeline run.
///
/// Operator runs bypass sticky-error suppression; automated runs do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Filesystem events or the periodic rescan.
    Watcher,
    /// The pull timer.
    Timer,
    /// `chezmoi-sync push` / `chezmoi-sync pull`.
    Manual,
}

impl Trigger {
    pub fn is_automated(&self) -> bool {
        !matches!(self, Trigger::Manual)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Watcher => "watcher",
            Trigger::Timer => "timer",
            Trigger::Manual => "manual",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Error classification shared by both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    ConfigInvalid,
    ExternalToolMissing,
    /// Network trouble, rate limiting, temporary I/O.
    Transient,
    /// Credentials rejected. Permanent until fixed by the operator.
    Auth,
    /// Upstream kept moving after one rebase attempt.
    RaceLost,
    ConflictNeedsOperator,
    DeferredLocalChanges,
    /// The adapter could not classify what the tool reported.
    AdapterAbort,
}

impl ErrorCategory {
    /// Categories that set the sticky flag on the run record.
    pub fn is_sticky(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Auth
                | ErrorCategory::ConflictNeedsOperator
                | ErrorCategory::ExternalToolMissing
        )
    }

    /// Categories that resolve on their own and need no backoff.
    pub fn is_informational(&self) -> bool {
        matches!(self, ErrorCategory::DeferredLocalChanges)
    }

    /// Categories worth retrying automatically.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Transient | ErrorCategory::RaceLost | ErrorCategory::AdapterAbort
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::ConfigInvalid => "config invalid",
            ErrorCategory::ExternalToolMissing => "external tool missing",
            ErrorCategory::Transient => "transient",
            ErrorCategory::Auth => "authentication",
            ErrorCategory::RaceLost => "race lost",
            ErrorCategory::ConflictNeedsOperator => "conflict needs operator",
            ErrorCategory::DeferredLocalChanges => "deferred: local changes",
            ErrorCategory::AdapterAbort => "adapter abort",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a run did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    DevMode,
    Clean,
    /// The other direction held the interlock.
    Busy,
    /// A sticky conflict suppresses automated runs in this direction.
    OperatorRequired,
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::DevMode => "dev-mode",
            SkipReason::Clean => "clean",
            SkipReason::Busy => "busy",
            SkipReason::OperatorRequired => "operator required",
        }
    }
}

/// The single terminal outcome of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        commit: Option<String>,
        #[serde(default)]
        rebases: u32,
        /// Targets the dotfiles tool declined to overwrite during apply.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        skipped_paths: Vec<String>,
    },
    Skipped {
        reason: SkipReason,
    },
    Failed {
        category: ErrorCategory,
        message: String,
    },
    Cancelled,
}

impl RunOutcome {
    pub fn ok() -> Self {
        RunOutcome::Ok {
            commit: None,
            rebases: 0,
            skipped_paths: Vec::new(),
        }
    }

    pub fn skipped(reason: SkipReason) -> Self {
        RunOutcome::Skipped { reason }
    }

    pub fn failed(category: ErrorCategory, message: impl Into<String>) -> Self {
        RunOutcome::Failed {
            category,
            message: message.into(),
        }
    }

    /// Outcomes that count as a healthy run for status purposes.
    pub fn is_success(&self) -> bool {
        match self {
            RunOutcome::Ok { .. } => true,
            RunOutcome::Skipped { reason } => {
                matches!(reason, SkipReason::Clean | SkipReason::DevMode)
            }
            RunOutcome::Failed { category, .. } => category.is_informational(),
            RunOutcome::Cancelled => false,
        }
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            RunOutcome::Failed { category, .. } => Some(*category),
            _ => None,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            RunOutcome::Ok {
                commit,
                rebases,
                skipped_paths,
            } => {
                let mut parts = vec!["ok".to_string()];
                if let Some(commit) = commit {
                    parts.push(short_commit(commit).to_string());
                }
                if *rebases > 0 {
                    parts.push(format!("{rebases} rebase(s)"));
                }
                if !skipped_paths.is_empty() {
                    parts.push(format!("{} target(s) skipped", skipped_paths.len()));
                }
                parts.join(", ")
            }
            RunOutcome::Skipped { reason } => format!("skipped ({})", reason.label()),
            RunOutcome::Failed { category, .. } => format!("failed ({category})"),
            RunOutcome::Cancelled => "cancelled".to_string(),
        }
    }
}

fn short_commit(id: &str) -> &str {
    id.get(..10).unwrap_or(id)
}

// ---------------------------------------------------------------------------
// Run record
// ---------------------------------------------------------------------------

/// A sticky error: survives later failures, cleared by a success or an
/// operator-initiated run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickyError {
    pub category: ErrorCategory,
    pub message: String,
    pub since: DateTime<Utc>,
}

/// Per-direction run bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub direction: Direction,
    #[serde(default)]
    pub attempts: u64,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_outcome: Option<RunOutcome>,
    #[serde(default)]
    pub last_error: Option<ErrorCategory>,
    #[serde(default)]
    pub last_error_message: Option<String>,
    #[serde(default)]
    pub last_commit: Option<String>,
    #[serde(default)]
    pub sticky: Option<StickyError>,
}

impl RunRecord {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            attempts: 0,
            last_attempt_at: None,
            last_success_at: None,
            last_outcome: None,
            last_error: None,
            last_error_message: None,
            last_commit: None,
            sticky: None,
        }
    }

    pub fn never_run(&self) -> bool {
        self.attempts == 0
    }

    /// Fold one terminal outcome into the record.
    ///
    /// `message` on failures must already be redacted by the caller.
    pub fn record(&mut self, outcome: RunOutcome, trigger: Trigger, at: DateTime<Utc>) {
        self.attempts += 1;
        self.last_attempt_at = Some(at);

        match &outcome {
            RunOutcome::Ok { commit, .. } => {
                self.last_success_at = Some(at);
                if commit.is_some() {
                    self.last_commit.clone_from(commit);
                }
                self.sticky = None;
            }
            RunOutcome::Skipped { reason } if outcome.is_success() => {
                self.last_success_at = Some(at);
                if *reason == SkipReason::Clean && !trigger.is_automated() {
                    self.sticky = None;
                }
            }
            RunOutcome::Skipped { .. } | RunOutcome::Cancelled => {}
            RunOutcome::Failed { category, message } => {
                self.last_error = Some(*category);
                self.last_error_message = Some(message.clone());
                if category.is_informational() {
                    self.last_success_at = Some(at);
                }
                if category.is_sticky() {
                    let since = match &self.sticky {
                        Some(existing) if existing.category == *category => existing.since,
                        _ => at,
                    };
                    self.sticky = Some(StickyError {
                        category: *category,
                        message: message.clone(),
                        since,
                    });
                }
            }
        }

        self.last_outcome = Some(outcome);
    }

    /// True when a sticky conflict suppresses automated writes.
    pub fn blocks_automation(&self) -> bool {
        matches!(
            &self.sticky,
            Some(StickyError {
                category: ErrorCategory::ConflictNeedsOperator,
                ..
            })
        )
    }
}

// ---------------------------------------------------------------------------
// Interlock diagnostics
// ---------------------------------------------------------------------------

/// Who currently holds the cross-direction interlock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterlockHolder {
    pub direction: Direction,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn new_record_is_never_run() {
        let record = RunRecord::new(Direction::Pull);
        assert!(record.never_run());
        assert!(record.last_outcome.is_none());
    }

    #[test]
    fn attempts_increase_monotonically() {
        let mut record = RunRecord::new(Direction::Push);
        record.record(RunOutcome::skipped(SkipReason::Clean), Trigger::Watcher, t(0));
        record.record(RunOutcome::skipped(SkipReason::Busy), Trigger::Watcher, t(1));
        record.record(RunOutcome::Cancelled, Trigger::Watcher, t(2));
        assert_eq!(record.attempts, 3);
        assert_eq!(record.last_attempt_at, Some(t(2)));
        assert_eq!(record.last_success_at, Some(t(0)));
    }

    #[test]
    fn conflict_is_sticky_until_success() {
        let mut record = RunRecord::new(Direction::Pull);
        record.record(
            RunOutcome::failed(ErrorCategory::ConflictNeedsOperator, "CONFLICT in .zshrc"),
            Trigger::Timer,
            t(0),
        );
        assert!(record.blocks_automation());

        record.record(
            RunOutcome::failed(ErrorCategory::Transient, "network down"),
            Trigger::Timer,
            t(10),
        );
        assert!(record.blocks_automation(), "transient errors keep the sticky flag");

        record.record(RunOutcome::ok(), Trigger::Manual, t(20));
        assert!(record.sticky.is_none());
        assert!(!record.blocks_automation());
    }

    #[test]
    fn repeated_sticky_error_keeps_original_since() {
        let mut record = RunRecord::new(Direction::Push);
        record.record(
            RunOutcome::failed(ErrorCategory::Auth, "denied"),
            Trigger::Watcher,
            t(0),
        );
        record.record(
            RunOutcome::failed(ErrorCategory::Auth, "denied again"),
            Trigger::Watcher,
            t(30),
        );
        let sticky = record.sticky.expect("sticky");
        assert_eq!(sticky.since, t(0));
        assert_eq!(sticky.message, "denied again");
    }

    #[test]
    fn deferred_local_changes_counts_as_healthy() {
        let mut record = RunRecord::new(Direction::Pull);
        record.record(
            RunOutcome::failed(ErrorCategory::DeferredLocalChanges, "dirty tree"),
            Trigger::Timer,
            t(5),
        );
        assert_eq!(record.last_success_at, Some(t(5)));
        assert!(record.sticky.is_none());
    }

    #[test]
    fn outcome_serializes_with_kind_tag() {
        let json = serde_json::to_value(RunOutcome::skipped(SkipReason::DevMode)).unwrap();
        assert_eq!(json["kind"], "skipped");
        assert_eq!(json["reason"], "dev_mode");
    }

    #[test]
    fn direction_parses_case_insensitively() {
        assert_eq!("PUSH".parse::<Direction>().unwrap(), Direction::Push);
        assert!("sideways".parse::<Direction>().is_err());
    }
}
