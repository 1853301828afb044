//! Size-based rotation of the per-direction log files.
//!
//! launchd appends stdout and stderr to `<dir>.log` and `<dir>.error.log`
//! under `LOG_DIR` and never truncates them. Once a file passes
//! [`MAX_LOG_BYTES`] it moves to `<name>.1`, older copies shift up, and
//! anything past [`MAX_ROTATED_FILES`] is dropped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chezmoi_sync_core::paths::{error_log_path, log_path};
use chezmoi_sync_core::Direction;

/// 10 MiB.
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

pub const MAX_ROTATED_FILES: usize = 5;

/// Rotate `path` when it has reached `max_bytes`.
///
/// Returns `Ok(false)` for small or missing files. The live path is recreated
/// empty so launchd's open descriptor is the only writer left on the old copy.
pub fn rotate_if_needed(path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes || max_files == 0 {
        return Ok(false);
    }

    let oldest = numbered_path(path, max_files);
    match fs::remove_file(&oldest) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    for n in (1..max_files).rev() {
        let from = numbered_path(path, n);
        if from.exists() {
            fs::rename(&from, numbered_path(path, n + 1))?;
        }
    }
    fs::rename(path, numbered_path(path, 1))?;
    fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    Ok(true)
}

/// Rotate both log files of every direction in `directions`.
///
/// Failures are logged per file and never stop the daemon.
pub fn rotate_logs(log_dir: &Path, directions: &[Direction]) {
    for direction in directions {
        for path in [
            log_path(log_dir, *direction),
            error_log_path(log_dir, *direction),
        ] {
            match rotate_if_needed(&path, MAX_LOG_BYTES, MAX_ROTATED_FILES) {
                Ok(true) => tracing::info!(path = %path.display(), "log file rotated"),
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "log rotation failed")
                }
            }
        }
    }
}

/// `push.log` → `push.log.2`
fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let mut name = base.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{n}"));
    base.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SMALL_LIMIT: u64 = 64;

    fn write_bytes(path: &Path, len: usize, byte: u8) {
        fs::write(path, vec![byte; len]).unwrap();
    }

    #[test]
    fn small_file_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("push.log");
        write_bytes(&log, 10, b'a');

        assert!(!rotate_if_needed(&log, SMALL_LIMIT, MAX_ROTATED_FILES).unwrap());
        assert!(!numbered_path(&log, 1).exists());
    }

    #[test]
    fn oversized_file_moves_to_first_slot() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("pull.error.log");
        write_bytes(&log, SMALL_LIMIT as usize, b'e');

        assert!(rotate_if_needed(&log, SMALL_LIMIT, MAX_ROTATED_FILES).unwrap());
        assert_eq!(fs::metadata(&log).unwrap().len(), 0);
        assert_eq!(
            fs::metadata(numbered_path(&log, 1)).unwrap().len(),
            SMALL_LIMIT
        );
    }

    #[test]
    fn copies_shift_and_oldest_is_dropped() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("push.log");
        for n in 1..=MAX_ROTATED_FILES {
            fs::write(numbered_path(&log, n), format!("gen-{n}")).unwrap();
        }
        write_bytes(&log, SMALL_LIMIT as usize + 1, b'x');

        rotate_if_needed(&log, SMALL_LIMIT, MAX_ROTATED_FILES).unwrap();

        assert_eq!(
            fs::read_to_string(numbered_path(&log, 2)).unwrap(),
            "gen-1"
        );
        assert_eq!(
            fs::read_to_string(numbered_path(&log, MAX_ROTATED_FILES)).unwrap(),
            format!("gen-{}", MAX_ROTATED_FILES - 1)
        );
        assert!(!numbered_path(&log, MAX_ROTATED_FILES + 1).exists());
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("never-written.log");
        assert!(!rotate_if_needed(&log, SMALL_LIMIT, MAX_ROTATED_FILES).unwrap());
    }

    #[test]
    fn rotate_logs_touches_only_selected_directions() {
        let dir = TempDir::new().unwrap();
        let big = MAX_LOG_BYTES as usize;
        for direction in Direction::all() {
            write_bytes(&log_path(dir.path(), *direction), big, b'o');
            write_bytes(&error_log_path(dir.path(), *direction), 1, b'e');
        }

        rotate_logs(dir.path(), &[Direction::Pull]);

        assert!(numbered_path(&log_path(dir.path(), Direction::Pull), 1).exists());
        assert!(!numbered_path(&error_log_path(dir.path(), Direction::Pull), 1).exists());
        assert!(!numbered_path(&log_path(dir.path(), Direction::Push), 1).exists());
    }
}
