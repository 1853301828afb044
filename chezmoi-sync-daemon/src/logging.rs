//! Tracing subscriber setup shared by the daemon and the CLI.
//!
//! `WARN` and above go to stderr, everything else to stdout; under launchd
//! that splits a service's output into `<dir>.error.log` and `<dir>.log`.

use std::io;

use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{fmt, EnvFilter};

use chezmoi_sync_core::LogFormat;

/// Install the global subscriber. `RUST_LOG` overrides `default_level`.
///
/// Calling this twice is harmless; the second call is a no-op.
pub fn init_tracing(format: LogFormat, default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let writer = io::stderr
        .with_max_level(Level::WARN)
        .or_else(io::stdout);

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(writer);

    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
