//! `chezmoi-sync push` / `chezmoi-sync pull`: one pipeline run, in the foreground.

use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;

use chezmoi_sync_core::{identity, Direction, Layout, RunOutcome, SyncConfig, Trigger};
use chezmoi_sync_daemon::{init_tracing, EXIT_CONFIG, EXIT_TOOL_MISSING};
use chezmoi_sync_engine::{manual_exit_code, CancelToken, ChezmoiGit, SyncController};

pub fn run(direction: Direction, layout: Layout) -> Result<i32> {
    let config = match SyncConfig::load(&layout) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{} {err}", "config error:".red().bold());
            return Ok(EXIT_CONFIG);
        }
    };
    init_tracing(config.log_format, "info");

    if let Some(code) = preflight(&config) {
        return Ok(code);
    }

    layout
        .ensure_state_dir()
        .context("failed to create state directory")?;
    let machine = identity::ensure_identity(&layout).context("failed to load machine id")?;
    let tool = Arc::new(ChezmoiGit::from_config(&config));
    let controller = SyncController::new(layout, config, machine, tool);

    let cancel = CancelToken::new();
    let outcome = match direction {
        Direction::Push => controller.run_push(Trigger::Manual, &cancel),
        Direction::Pull => controller.run_pull(Trigger::Manual, &cancel),
    };
    print_outcome(direction, &outcome);
    Ok(manual_exit_code(&outcome))
}

/// Tool and watch-path checks shared with `daemon run`.
fn preflight(config: &SyncConfig) -> Option<i32> {
    for tool in [&config.git_bin, &config.chezmoi_bin] {
        if which::which(tool).is_err() {
            eprintln!("{} '{tool}' not found on PATH", "error:".red().bold());
            return Some(EXIT_TOOL_MISSING);
        }
    }
    if !config.watch_path.is_dir() {
        eprintln!(
            "{} WATCH_PATH {} is not a directory",
            "config error:".red().bold(),
            config.watch_path.display()
        );
        return Some(EXIT_CONFIG);
    }
    None
}

fn print_outcome(direction: Direction, outcome: &RunOutcome) {
    let summary = outcome.summary();
    match outcome {
        RunOutcome::Failed { message, .. } => {
            println!("{direction}: {}", summary.red().bold());
            println!("  {message}");
        }
        o if o.is_success() => println!("{direction}: {}", summary.green()),
        _ => println!("{direction}: {}", summary.yellow()),
    }
    if let RunOutcome::Ok { skipped_paths, .. } = outcome {
        for path in skipped_paths {
            println!("  skipped target: {path}");
        }
    }
}
