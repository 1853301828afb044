//! Machine identity store.
//!
//! The identity is derived once per host and persisted as a single line in
//! `<state_dir>/machine-id`. Later calls only read it back.

use std::path::Path;
use std::process::Command;

use crate::error::{io_err, CoreError};
use crate::paths::{ensure_dir, Layout};
use crate::types::MachineId;

/// Used when the hostname normalizes to nothing useful.
pub const FALLBACK_IDENTITY: &str = "unknown-host";

/// Where hostnames come from. Swappable for tests.
pub trait HostnameSource {
    /// Platform-preferred local host name (macOS: `scutil --get LocalHostName`).
    fn preferred(&self) -> Option<String>;

    /// `gethostname(2)`; may be a fully-qualified name.
    fn system(&self) -> Option<String>;
}

/// Queries the running OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsHostname;

impl HostnameSource for OsHostname {
    fn preferred(&self) -> Option<String> {
        if !cfg!(target_os = "macos") {
            return None;
        }
        let output = Command::new("scutil")
            .args(["--get", "LocalHostName"])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        non_empty(String::from_utf8_lossy(&output.stdout).trim())
    }

    fn system(&self) -> Option<String> {
        system_hostname()
    }
}

#[cfg(unix)]
fn system_hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for buf.len() bytes; gethostname NUL-terminates on
    // success when the name fits, and we never read past the buffer.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
    if rc != 0 {
        return None;
    }
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    non_empty(String::from_utf8_lossy(&buf[..end]).trim())
}

#[cfg(not(unix))]
fn system_hostname() -> Option<String> {
    std::env::var("COMPUTERNAME").ok().and_then(|s| non_empty(s.trim()))
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Lowercase and replace everything outside `[a-z0-9-]` with `-`.
///
/// Empty or hyphen-only results become [`FALLBACK_IDENTITY`]. The output is
/// always a fixed point: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(raw: &str) -> String {
    let mapped: String = raw
        .trim()
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();

    if mapped.chars().all(|c| c == '-') {
        FALLBACK_IDENTITY.to_string()
    } else {
        mapped
    }
}

/// Derive an identity from a hostname source without touching disk.
pub fn derive(source: &dyn HostnameSource) -> MachineId {
    if let Some(name) = source.preferred() {
        return MachineId(normalize(strip_mdns_suffix(&name)));
    }
    if let Some(fqdn) = source.system() {
        let first = fqdn.split('.').next().unwrap_or_default();
        return MachineId(normalize(first));
    }
    MachineId(FALLBACK_IDENTITY.to_string())
}

fn strip_mdns_suffix(name: &str) -> &str {
    let trimmed = name.trim().trim_end_matches('.');
    let lower = trimmed.to_ascii_lowercase();
    if lower.ends_with(".local") {
        &trimmed[..trimmed.len() - ".local".len()]
    } else {
        trimmed
    }
}

/// Return the persisted identity, creating it on first use.
///
/// Order: existing file, then migration from the legacy path, then derivation.
pub fn ensure_identity_at(
    layout: &Layout,
    source: &dyn HostnameSource,
) -> Result<MachineId, CoreError> {
    let path = layout.machine_id_path();
    if let Some(existing) = read_identity(&path)? {
        return Ok(existing);
    }

    ensure_dir(&layout.state_dir)?;

    let legacy = layout.legacy_machine_id_path();
    if let Some(migrated) = read_identity(&legacy)? {
        tracing::info!(
            from = %legacy.display(),
            to = %path.display(),
            machine = %migrated,
            "migrating machine id from legacy location",
        );
        write_atomic(&path, &migrated.0)?;
        return Ok(migrated);
    }

    let derived = derive(source);
    write_atomic(&path, &derived.0)?;
    tracing::info!(machine = %derived, path = %path.display(), "created machine id");
    Ok(derived)
}

/// `ensure_identity_at` against the live OS hostname.
pub fn ensure_identity(layout: &Layout) -> Result<MachineId, CoreError> {
    ensure_identity_at(layout, &OsHostname)
}

/// Read a persisted identity. Blank files count as absent.
pub fn read_identity(path: &Path) -> Result<Option<MachineId>, CoreError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(path, err)),
    };
    let line = contents.lines().next().unwrap_or_default().trim();
    if line.is_empty() {
        return Ok(None);
    }
    let normalized = normalize(line);
    if normalized != line {
        tracing::warn!(
            path = %path.display(),
            stored = line,
            using = %normalized,
            "machine id file is not normalized; using normalized form",
        );
    }
    Ok(Some(MachineId(normalized)))
}

fn write_atomic(path: &Path, token: &str) -> Result<(), CoreError> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, format!("{token}\n")).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}
