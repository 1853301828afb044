//! `chezmoi-sync start|stop|restart`: launchd lifecycle of both services.

use anyhow::{Context, Result};

use chezmoi_sync_core::Layout;
use chezmoi_sync_daemon::launchd;

pub fn start(layout: &Layout) -> Result<i32> {
    launchd::start(&layout.home).context("failed to start services")?;
    println!("started push and pull services");
    Ok(0)
}

pub fn stop() -> Result<i32> {
    launchd::stop().context("failed to stop services")?;
    println!("stopped push and pull services");
    Ok(0)
}

pub fn restart() -> Result<i32> {
    launchd::restart().context("failed to restart services")?;
    println!("restarted push and pull services");
    Ok(0)
}
