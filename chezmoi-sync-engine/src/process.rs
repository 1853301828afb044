//! Cancellable subprocess runner.
//!
//! Children get piped stdout/stderr drained on reader threads, a null stdin,
//! and are polled with `wait_timeout` so the kill flag of a [`CancelToken`]
//! is honoured within [`POLL_INTERVAL`].

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

use wait_timeout::ChildExt;

use crate::cancel::CancelToken;
use crate::error::SyncError;

pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Captured result of one finished subprocess.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// stdout and stderr joined; some tools report conflicts on stdout.
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }

    pub fn status_label(&self) -> String {
        match self.status.code() {
            Some(code) => code.to_string(),
            None => "signal".to_string(),
        }
    }
}

/// Human-readable `args` for logs and errors.
pub fn describe_args(command: &Command) -> String {
    command
        .get_args()
        .map(|a| a.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run `command` to completion, or until `cancel` raises its kill flag.
///
/// A non-zero exit is *not* an error here; callers classify it.
pub fn run(command: &mut Command, cancel: &CancelToken) -> Result<ProcessOutput, SyncError> {
    let tool = command.get_program().to_string_lossy().into_owned();
    let args = describe_args(command);
    tracing::debug!(tool = %tool, args = %args, "spawning");

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SyncError::ToolMissing { tool: tool.clone() }
            } else {
                SyncError::Io {
                    path: tool.clone().into(),
                    source: e,
                }
            }
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    // Reader threads are detached on error: a grandchild may still hold the pipes.
    let status = wait(&mut child, cancel, &tool)?;

    let output = ProcessOutput {
        status,
        stdout: join(stdout),
        stderr: join(stderr),
    };
    if !output.stderr.trim().is_empty() {
        tracing::debug!(tool = %tool, args = %args, status = %output.status_label(), stderr = %output.stderr.trim(), "tool stderr");
    }
    Ok(output)
}

fn wait(child: &mut Child, cancel: &CancelToken, tool: &str) -> Result<ExitStatus, SyncError> {
    loop {
        match child.wait_timeout(POLL_INTERVAL) {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {
                if cancel.is_killed() {
                    tracing::warn!(tool, pid = child.id(), "killing subprocess");
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SyncError::Killed {
                        tool: tool.to_string(),
                    });
                }
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SyncError::Io {
                    path: tool.into(),
                    source: e,
                });
            }
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}
