//! chezmoi-sync: keep a chezmoi source tree in sync with its git upstream.
//!
//! # Usage
//!
//! ```text
//! chezmoi-sync status [--json]
//! chezmoi-sync push | pull
//! chezmoi-sync dev-mode on|off|status
//! chezmoi-sync start | stop | restart
//! chezmoi-sync daemon run [--direction push|pull|both]
//! chezmoi-sync daemon install | uninstall | logs [--lines N] [--errors-only]
//! ```

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{error::ErrorKind, Parser, Subcommand};
use colored::Colorize;

use chezmoi_sync_core::{Direction, Layout};

use commands::{daemon::DaemonCommand, dev_mode::DevModeCommand, status::StatusArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "chezmoi-sync",
    version,
    about = "Automatic push/pull sync for a chezmoi dotfiles repository",
    long_about = None,
)]
struct Cli {
    /// Config file (default: $HOMEBREW_PREFIX/etc/chezmoi-sync/chezmoi-sync.conf
    /// or ~/.config/chezmoi-sync/chezmoi-sync.conf).
    #[arg(long, global = true, env = "CHEZMOI_SYNC_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// State directory holding the machine id, dev-mode flag and run records.
    #[arg(long, global = true, env = "CHEZMOI_SYNC_STATE_DIR", value_name = "DIR")]
    state_dir: Option<PathBuf>,

    /// Defaults to `status` when omitted.
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show identity, dev-mode, services and the last run of each direction.
    #[command(visible_alias = "st")]
    Status(StatusArgs),

    /// Commit and push local changes now.
    Push,

    /// Fetch, merge and apply upstream changes now.
    Pull,

    /// Pause or resume automated sync.
    #[command(name = "dev-mode", visible_alias = "dev")]
    DevMode {
        #[command(subcommand)]
        command: DevModeCommand,
    },

    /// Load both launchd services.
    Start,

    /// Unload both launchd services.
    Stop,

    /// Restart both launchd services.
    Restart,

    /// Run the daemon in the foreground or manage its launchd manifests.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };

    match dispatch(cli) {
        Ok(code) => exit_code(code),
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::from(1)
        }
    }
}

fn dispatch(cli: Cli) -> Result<i32> {
    let layout = Layout::resolve(cli.config, cli.state_dir)
        .context("could not resolve chezmoi-sync paths")?;

    let Some(command) = cli.command else {
        return StatusArgs { json: false }.run(&layout);
    };
    match command {
        Commands::Status(args) => args.run(&layout),
        Commands::Push => commands::sync::run(Direction::Push, layout),
        Commands::Pull => commands::sync::run(Direction::Pull, layout),
        Commands::DevMode { command } => commands::dev_mode::run(command, &layout),
        Commands::Start => commands::service::start(&layout),
        Commands::Stop => commands::service::stop(),
        Commands::Restart => commands::service::restart(),
        Commands::Daemon { command } => commands::daemon::run(command, layout),
    }
}

fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}
