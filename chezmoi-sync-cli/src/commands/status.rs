//! `chezmoi-sync status`: one screen answering "is sync working on this machine?".

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use chezmoi_sync_core::{Direction, Layout};
use chezmoi_sync_daemon::launchd::{self, ServiceState};
use chezmoi_sync_daemon::paths::{plist_path, service_label};
use chezmoi_sync_engine::status::{self, DirectionStatus};
use chezmoi_sync_engine::{Health, ServiceStatus, StatusReport};

use super::load_config_lenient;

/// Arguments for `chezmoi-sync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self, layout: &Layout) -> Result<i32> {
        let config = load_config_lenient(layout);
        let now = Utc::now();
        let report = match status::collect(
            env!("CARGO_PKG_VERSION"),
            layout,
            &config,
            service_statuses(layout),
            now,
        ) {
            Ok(report) => report,
            Err(err) => {
                // Exit 1 means dev-mode on this path; unreadable state is stale.
                eprintln!("{} failed to read sync state: {err}", "error:".red().bold());
                return Ok(Health::Stale.exit_code());
            }
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to render status JSON")?
            );
        } else {
            print_report(&report, now);
        }
        Ok(report.exit_code)
    }
}

fn service_statuses(layout: &Layout) -> Vec<ServiceStatus> {
    Direction::all()
        .iter()
        .map(|direction| {
            let installed = plist_path(&layout.home, *direction).exists();
            let state = match launchd::service_state(*direction) {
                ServiceState::NotLoaded if !installed => "not installed".to_string(),
                other => other.describe(),
            };
            ServiceStatus {
                label: service_label(*direction).to_string(),
                state,
            }
        })
        .collect()
}

#[derive(Tabled)]
struct DirectionRow {
    #[tabled(rename = "direction")]
    direction: String,
    #[tabled(rename = "last outcome")]
    last_outcome: String,
    #[tabled(rename = "last attempt")]
    last_attempt: String,
    #[tabled(rename = "last success")]
    last_success: String,
    #[tabled(rename = "attempts")]
    attempts: u64,
    #[tabled(rename = "sticky")]
    sticky: String,
}

fn direction_row(status: &DirectionStatus, now: DateTime<Utc>) -> DirectionRow {
    DirectionRow {
        direction: status.direction.to_string(),
        last_outcome: if status.never_run {
            "never run".to_string()
        } else {
            status.last_outcome.clone().unwrap_or_else(|| "-".to_string())
        },
        last_attempt: format_age(status.last_attempt_at, now),
        last_success: format_age(status.last_success_at, now),
        attempts: status.attempts,
        sticky: status
            .sticky
            .as_ref()
            .map(|s| format!("{} since {}", s.category, format_age(Some(s.since), now)))
            .unwrap_or_else(|| "-".to_string()),
    }
}

fn print_report(report: &StatusReport, now: DateTime<Utc>) {
    println!(
        "{} {}",
        "Chezmoi Sync System Status".bold(),
        format!("(chezmoi-sync {})", report.version).dimmed()
    );
    println!(
        "machine:    {}",
        report.machine.as_deref().unwrap_or("(not assigned yet)")
    );
    println!(
        "dev-mode:   {}",
        if report.dev_mode {
            "on".yellow().bold().to_string()
        } else {
            "off".to_string()
        }
    );
    println!("upstream:   {}/{}", report.remote, report.branch);
    println!(
        "intervals:  pull every {}s, push debounce {}s",
        report.pull_interval_seconds, report.push_debounce_seconds
    );
    match &report.interlock {
        Some(holder) => println!(
            "interlock:  held by {} (pid {}, {})",
            holder.direction,
            holder.pid,
            format_age(Some(holder.acquired_at), now)
        ),
        None => println!("interlock:  free"),
    }
    println!();

    for service in &report.services {
        println!("{:<24} {}", service.label, service.state);
    }
    println!();

    let rows: Vec<DirectionRow> = report
        .directions
        .iter()
        .map(|d| direction_row(d, now))
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    for direction in &report.directions {
        if let Some(message) = &direction.last_error_message {
            println!("{} last error: {message}", direction.direction);
        }
    }
    println!();

    println!("config:     {}", report.paths.config_file.display());
    println!("state dir:  {}", report.paths.state_dir.display());
    println!("log dir:    {}", report.paths.log_dir.display());
    println!("watch path: {}", report.paths.watch_path.display());
    println!();

    let health = match report.health {
        Health::Healthy => "healthy".green().bold(),
        Health::DevMode => "paused (dev-mode)".yellow().bold(),
        Health::NeedsOperator => "needs operator".red().bold(),
        Health::Stale => "stale or never run".yellow().bold(),
    };
    println!("health:     {health}");
}

fn format_age(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(at) = at else {
        return "never".to_string();
    };
    let secs = now.signed_duration_since(at).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3_599 => format!("{}m ago", secs / 60),
        3_600..=86_399 => format!("{}h ago", secs / 3_600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ages_use_the_largest_whole_unit() {
        let now = DateTime::from_timestamp(1_800_000_000, 0).unwrap();
        let ago = |secs: i64| Some(now - chrono::Duration::seconds(secs));
        assert_eq!(format_age(None, now), "never");
        assert_eq!(format_age(ago(5), now), "5s ago");
        assert_eq!(format_age(ago(125), now), "2m ago");
        assert_eq!(format_age(ago(7_200), now), "2h ago");
        assert_eq!(format_age(ago(3 * 86_400), now), "3d ago");
        assert_eq!(format_age(ago(-30), now), "0s ago");
    }
}
