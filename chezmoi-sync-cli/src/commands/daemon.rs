//! `chezmoi-sync daemon`: foreground runtime and launchd manifests.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand, ValueEnum};
use colored::Colorize;

use chezmoi_sync_core::paths::{error_log_path, log_path};
use chezmoi_sync_core::{Direction, Layout, SyncConfig};
use chezmoi_sync_daemon::{
    install_launchd, start_blocking, uninstall_launchd, DaemonOptions, DirectionSelection,
    ManifestSpec,
};

use super::load_config_lenient;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the sync daemon in the foreground (what launchd starts).
    Run(RunArgs),
    /// Write the push and pull launchd manifests.
    Install,
    /// Unload and remove both launchd manifests.
    Uninstall,
    /// Print the tail of the daemon log files.
    Logs(LogsArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Which directions this process drives.
    #[arg(long, value_enum, default_value_t = DirectionArg::Both)]
    pub direction: DirectionArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DirectionArg {
    Push,
    Pull,
    Both,
}

impl From<DirectionArg> for DirectionSelection {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Push => DirectionSelection::Push,
            DirectionArg::Pull => DirectionSelection::Pull,
            DirectionArg::Both => DirectionSelection::Both,
        }
    }
}

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Number of trailing lines to show per file.
    #[arg(long, default_value_t = 100)]
    pub lines: usize,

    /// Show only the error logs.
    #[arg(long)]
    pub errors_only: bool,
}

pub fn run(command: DaemonCommand, layout: Layout) -> Result<i32> {
    match command {
        DaemonCommand::Run(args) => {
            let options = DaemonOptions {
                selection: args.direction.into(),
            };
            match start_blocking(layout, options) {
                Ok(()) => Ok(0),
                Err(err) => {
                    eprintln!("{} {err}", "daemon error:".red().bold());
                    Ok(err.exit_code())
                }
            }
        }
        DaemonCommand::Install => {
            let config = SyncConfig::load(&layout).context("invalid configuration")?;
            let binary = std::env::current_exe().context("could not locate chezmoi-sync binary")?;
            let specs: Vec<ManifestSpec> = Direction::all()
                .iter()
                .map(|d| ManifestSpec::from_config(*d, &binary, &config, &layout))
                .collect();
            for path in install_launchd(&layout.home, &specs)
                .context("failed to install launchd manifests")?
            {
                println!("installed {}", path.display());
            }
            println!("run `chezmoi-sync start` to load the services");
            Ok(0)
        }
        DaemonCommand::Uninstall => {
            uninstall_launchd(&layout.home).context("failed to uninstall launchd manifests")?;
            println!("uninstalled push and pull services");
            Ok(0)
        }
        DaemonCommand::Logs(args) => {
            let config = load_config_lenient(&layout);
            for direction in Direction::all() {
                if !args.errors_only {
                    print_tail(&log_path(&config.log_dir, *direction), args.lines)?;
                }
                print_tail(&error_log_path(&config.log_dir, *direction), args.lines)?;
            }
            Ok(0)
        }
    }
}

fn print_tail(path: &Path, lines: usize) -> Result<()> {
    if !path.exists() {
        println!("log file not found: {}", path.display());
        return Ok(());
    }

    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut tail = VecDeque::<String>::with_capacity(lines);
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if lines == 0 {
            continue;
        }
        if tail.len() == lines {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    println!("==> {} <==", path.display());
    for line in tail {
        println!("{line}");
    }
    Ok(())
}
