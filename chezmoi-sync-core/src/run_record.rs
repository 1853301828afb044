//! Run-record checkpoints.
//!
//! Persists one [`RunRecord`] JSON document per direction at
//! `<state_dir>/<direction>.state.json`. Writes use the atomic `.tmp` + rename
//! pattern so the status reporter never sees a torn file.

use std::path::Path;

use crate::error::{io_err, CoreError};
use crate::paths::{ensure_dir, Layout};
use crate::types::{Direction, RunRecord};

/// Load the checkpoint for `direction`.
///
/// Returns a fresh never-run record if the file does not exist yet.
pub fn load_at(layout: &Layout, direction: Direction) -> Result<RunRecord, CoreError> {
    let path = layout.run_record_path(direction);
    load_from(&path, direction)
}

fn load_from(path: &Path, direction: Direction) -> Result<RunRecord, CoreError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(RunRecord::new(direction));
        }
        Err(err) => return Err(io_err(path, err)),
    };
    let record: RunRecord = serde_json::from_str(&contents).map_err(|e| CoreError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(record)
}

/// Save the checkpoint atomically: write `<path>.tmp`, rename over `<path>`.
pub fn save_at(layout: &Layout, record: &RunRecord) -> Result<(), CoreError> {
    let path = layout.run_record_path(record.direction);
    ensure_dir(&layout.state_dir)?;

    let json = serde_json::to_string_pretty(record)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorCategory, RunOutcome, Trigger};
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn missing_checkpoint_is_never_run() {
        let root = TempDir::new().unwrap();
        let layout = Layout::rooted_at(root.path());
        let record = load_at(&layout, Direction::Push).unwrap();
        assert!(record.never_run());
        assert_eq!(record.direction, Direction::Push);
    }

    #[test]
    fn saved_record_is_read_back() {
        let root = TempDir::new().unwrap();
        let layout = Layout::rooted_at(root.path());
        let mut record = RunRecord::new(Direction::Pull);
        record.record(
            RunOutcome::failed(ErrorCategory::ConflictNeedsOperator, "CONFLICT (content)"),
            Trigger::Timer,
            Utc::now(),
        );

        save_at(&layout, &record).unwrap();
        let loaded = load_at(&layout, Direction::Pull).unwrap();
        assert_eq!(loaded, record);
        assert!(!layout
            .run_record_path(Direction::Pull)
            .with_extension("json.tmp")
            .exists());
    }

    #[test]
    fn corrupt_checkpoint_reports_path() {
        let root = TempDir::new().unwrap();
        let layout = Layout::rooted_at(root.path());
        std::fs::create_dir_all(&layout.state_dir).unwrap();
        std::fs::write(layout.run_record_path(Direction::Push), "{not json").unwrap();

        let err = load_at(&layout, Direction::Push).unwrap_err();
        assert!(matches!(err, CoreError::Parse { .. }), "got: {err}");
        assert!(err.to_string().contains("push.state.json"));
    }
}
