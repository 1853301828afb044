//! `chezmoi-sync dev-mode`: the operator's switch for automated sync.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use chezmoi_sync_core::{DevModeGate, Layout};

#[derive(Subcommand, Debug)]
pub enum DevModeCommand {
    /// Pause automated push and pull.
    On,
    /// Resume automated sync.
    Off,
    /// Print whether dev-mode is on.
    Status,
}

pub fn run(command: DevModeCommand, layout: &Layout) -> Result<i32> {
    let gate = DevModeGate::new(layout.dev_mode_path());
    match command {
        DevModeCommand::On => {
            gate.set(true)
                .with_context(|| format!("failed to create {}", gate.path().display()))?;
            println!(
                "dev-mode {}: automated sync paused until `chezmoi-sync dev-mode off`",
                "on".yellow().bold()
            );
        }
        DevModeCommand::Off => {
            gate.set(false)
                .with_context(|| format!("failed to remove {}", gate.path().display()))?;
            println!("dev-mode {}: automated sync resumed", "off".green());
        }
        DevModeCommand::Status => {
            if gate.is_enabled() {
                println!("dev-mode {}", "on".yellow().bold());
            } else {
                println!("dev-mode {}", "off".green());
            }
        }
    }
    Ok(0)
}
