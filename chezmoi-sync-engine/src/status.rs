//! Status report model and its exit code.
//!
//! Rendering (table or JSON) belongs to the front end; this module only
//! gathers state and decides health.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use chezmoi_sync_core::{
    identity, run_record, DevModeGate, Direction, ErrorCategory, InterlockHolder, Layout,
    RunRecord, StickyError, SyncConfig,
};

use crate::error::SyncError;
use crate::interlock::Interlock;

/// First matching rule wins, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    /// A direction carries a sticky error.
    NeedsOperator,
    DevMode,
    Healthy,
    /// A direction never ran or has not succeeded recently.
    Stale,
}

impl Health {
    pub fn exit_code(&self) -> i32 {
        match self {
            Health::Healthy => 0,
            Health::DevMode => 1,
            Health::NeedsOperator => 2,
            Health::Stale => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub label: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectionStatus {
    pub direction: Direction,
    pub never_run: bool,
    pub attempts: u64,
    pub last_outcome: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<ErrorCategory>,
    pub last_error_message: Option<String>,
    pub last_commit: Option<String>,
    pub sticky: Option<StickyError>,
    /// Succeeded within the freshness window.
    pub fresh: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PathsReport {
    pub config_file: PathBuf,
    pub state_dir: PathBuf,
    pub log_dir: PathBuf,
    pub watch_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub version: String,
    pub machine: Option<String>,
    pub dev_mode: bool,
    pub services: Vec<ServiceStatus>,
    pub directions: Vec<DirectionStatus>,
    pub interlock: Option<InterlockHolder>,
    pub paths: PathsReport,
    pub remote: String,
    pub branch: String,
    pub pull_interval_seconds: u64,
    pub push_debounce_seconds: u64,
    pub health: Health,
    pub exit_code: i32,
}

/// Window within which a direction must have succeeded to count as fresh.
pub fn freshness_window(pull_interval: Duration) -> chrono::Duration {
    chrono::Duration::from_std(pull_interval * 2).unwrap_or_else(|_| chrono::Duration::days(365))
}

fn is_fresh(record: &RunRecord, window: chrono::Duration, now: DateTime<Utc>) -> bool {
    record
        .last_success_at
        .is_some_and(|at| now.signed_duration_since(at) <= window)
}

/// Apply the exit-code rules to a set of run records.
pub fn assess(
    records: &[RunRecord],
    dev_mode: bool,
    pull_interval: Duration,
    now: DateTime<Utc>,
) -> Health {
    if records.iter().any(|r| r.sticky.is_some()) {
        return Health::NeedsOperator;
    }
    if dev_mode {
        return Health::DevMode;
    }
    let window = freshness_window(pull_interval);
    if !records.is_empty() && records.iter().all(|r| is_fresh(r, window, now)) {
        Health::Healthy
    } else {
        Health::Stale
    }
}

fn direction_status(record: RunRecord, window: chrono::Duration, now: DateTime<Utc>) -> DirectionStatus {
    DirectionStatus {
        direction: record.direction,
        never_run: record.never_run(),
        attempts: record.attempts,
        last_outcome: record.last_outcome.as_ref().map(|o| o.summary()),
        last_attempt_at: record.last_attempt_at,
        last_success_at: record.last_success_at,
        last_error: record.last_error,
        last_error_message: record.last_error_message.clone(),
        last_commit: record.last_commit.clone(),
        fresh: is_fresh(&record, window, now),
        sticky: record.sticky,
    }
}

/// A corrupt checkpoint reads as never-run so the direction reports stale
/// rather than failing the whole report.
fn load_record_lenient(layout: &Layout, direction: Direction) -> RunRecord {
    match run_record::load_at(layout, direction) {
        Ok(record) => record,
        Err(err) => {
            tracing::warn!(direction = %direction, error = %err, "unreadable run record; reporting as never run");
            RunRecord::new(direction)
        }
    }
}

/// Gather everything `chezmoi-sync status` shows.
///
/// Read-only: a missing identity is reported as `None`, not created.
pub fn collect(
    version: &str,
    layout: &Layout,
    config: &SyncConfig,
    services: Vec<ServiceStatus>,
    now: DateTime<Utc>,
) -> Result<StatusReport, SyncError> {
    let machine = identity::read_identity(&layout.machine_id_path())?.map(|m| m.0);
    let dev_mode = DevModeGate::new(layout.dev_mode_path()).is_enabled();
    let records: Vec<RunRecord> = Direction::all()
        .iter()
        .map(|direction| load_record_lenient(layout, *direction))
        .collect();
    let interlock = match Interlock::inspect(&layout.interlock_path()) {
        Ok(holder) => holder,
        Err(err) => {
            tracing::warn!(error = %err, "could not read interlock holder");
            None
        }
    };

    let health = assess(&records, dev_mode, config.pull_interval, now);
    let window = freshness_window(config.pull_interval);
    let directions = records
        .into_iter()
        .map(|r| direction_status(r, window, now))
        .collect();

    Ok(StatusReport {
        version: version.to_string(),
        machine,
        dev_mode,
        services,
        directions,
        interlock,
        paths: PathsReport {
            config_file: layout.config_file.clone(),
            state_dir: layout.state_dir.clone(),
            log_dir: config.log_dir.clone(),
            watch_path: config.watch_path.clone(),
        },
        remote: config.remote_name.clone(),
        branch: config.branch_name.clone(),
        pull_interval_seconds: config.pull_interval.as_secs(),
        push_debounce_seconds: config.push_debounce.as_secs(),
        health,
        exit_code: health.exit_code(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chezmoi_sync_core::{RunOutcome, SkipReason, Trigger};
    use tempfile::TempDir;

    const INTERVAL: Duration = Duration::from_secs(300);

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_800_000_000, 0).unwrap()
    }

    fn succeeded(direction: Direction, secs_ago: i64) -> RunRecord {
        let mut record = RunRecord::new(direction);
        record.record(
            RunOutcome::ok(),
            Trigger::Timer,
            now() - chrono::Duration::seconds(secs_ago),
        );
        record
    }

    #[test]
    fn never_run_is_stale() {
        let records = vec![RunRecord::new(Direction::Push), RunRecord::new(Direction::Pull)];
        assert_eq!(assess(&records, false, INTERVAL, now()), Health::Stale);
        assert_eq!(Health::Stale.exit_code(), 3);
    }

    #[test]
    fn both_recent_is_healthy() {
        let records = vec![succeeded(Direction::Push, 10), succeeded(Direction::Pull, 599)];
        assert_eq!(assess(&records, false, INTERVAL, now()), Health::Healthy);
    }

    #[test]
    fn old_success_is_stale() {
        let records = vec![succeeded(Direction::Push, 10), succeeded(Direction::Pull, 601)];
        assert_eq!(assess(&records, false, INTERVAL, now()), Health::Stale);
    }

    #[test]
    fn dev_mode_beats_freshness_and_sticky_beats_dev_mode() {
        let mut records = vec![succeeded(Direction::Push, 10), succeeded(Direction::Pull, 10)];
        assert_eq!(assess(&records, true, INTERVAL, now()), Health::DevMode);

        records[1].record(
            RunOutcome::failed(ErrorCategory::ConflictNeedsOperator, "CONFLICT"),
            Trigger::Timer,
            now(),
        );
        assert_eq!(assess(&records, true, INTERVAL, now()), Health::NeedsOperator);
        assert_eq!(Health::NeedsOperator.exit_code(), 2);
    }

    #[test]
    fn clean_skip_keeps_direction_fresh() {
        let mut push = RunRecord::new(Direction::Push);
        push.record(RunOutcome::skipped(SkipReason::Clean), Trigger::Watcher, now());
        let records = vec![push, succeeded(Direction::Pull, 1)];
        assert_eq!(assess(&records, false, INTERVAL, now()), Health::Healthy);
    }

    #[test]
    fn collect_on_cold_start_does_not_create_identity() {
        let root = TempDir::new().unwrap();
        let layout = Layout::rooted_at(root.path());
        let config = SyncConfig::defaults(&layout);

        let report = collect("0.1.0", &layout, &config, Vec::new(), now()).unwrap();
        assert!(report.machine.is_none());
        assert!(!layout.machine_id_path().exists());
        assert_eq!(report.exit_code, 3);
        assert!(report.directions.iter().all(|d| d.never_run));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["health"], "stale");
        assert_eq!(json["directions"][0]["direction"], "push");
    }

    #[test]
    fn corrupt_checkpoint_reports_stale_not_an_error() {
        let root = TempDir::new().unwrap();
        let layout = Layout::rooted_at(root.path());
        let config = SyncConfig::defaults(&layout);
        std::fs::create_dir_all(&layout.state_dir).unwrap();
        std::fs::write(layout.run_record_path(Direction::Push), "{ not json").unwrap();
        run_record::save_at(&layout, &succeeded(Direction::Pull, 5)).unwrap();

        let report = collect("0.1.0", &layout, &config, Vec::new(), now()).unwrap();
        assert_eq!(report.health, Health::Stale);
        assert_eq!(report.exit_code, 3);
        assert!(report.directions[0].never_run);
        assert!(!report.directions[1].never_run);
    }
}
