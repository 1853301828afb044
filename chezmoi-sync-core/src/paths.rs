//! On-disk layout.
//!
//! # Storage layout
//!
//! ```text
//! <prefix>/etc/chezmoi-sync/chezmoi-sync.conf     (or ~/.config/chezmoi-sync/)
//! <prefix>/var/lib/chezmoi-sync/                  (or ~/.local/state/chezmoi-sync/)
//!   machine-id
//!   dev-mode
//!   push.state.json
//!   pull.state.json
//!   interlock.lock
//! <LOG_DIR>/
//!   push.log  push.error.log  pull.log  pull.error.log
//! ```
//!
//! Every resolver has an `_at` form taking an explicit home and prefix; tests
//! must use those and never touch the real home directory.

use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::types::Direction;

pub const APP_NAME: &str = "chezmoi-sync";
pub const CONFIG_FILE_NAME: &str = "chezmoi-sync.conf";
pub const MACHINE_ID_FILE: &str = "machine-id";
pub const DEV_MODE_FILE: &str = "dev-mode";
pub const INTERLOCK_FILE: &str = "interlock.lock";

/// Env var naming the package-manager install prefix.
pub const PREFIX_ENV: &str = "HOMEBREW_PREFIX";

/// Resolved file locations for one installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub home: PathBuf,
    pub prefix: Option<PathBuf>,
    pub config_file: PathBuf,
    pub state_dir: PathBuf,
}

impl Layout {
    /// Resolve from `dirs::home_dir()` and `$HOMEBREW_PREFIX`.
    pub fn resolve(
        config_override: Option<PathBuf>,
        state_override: Option<PathBuf>,
    ) -> Result<Self, CoreError> {
        let home = dirs::home_dir().ok_or(CoreError::HomeNotFound)?;
        let prefix = std::env::var_os(PREFIX_ENV)
            .map(PathBuf::from)
            .filter(|p| !p.as_os_str().is_empty());
        Ok(Self::resolve_at(
            &home,
            prefix.as_deref(),
            config_override,
            state_override,
        ))
    }

    /// Pure resolver; no I/O.
    pub fn resolve_at(
        home: &Path,
        prefix: Option<&Path>,
        config_override: Option<PathBuf>,
        state_override: Option<PathBuf>,
    ) -> Self {
        let config_file = config_override.unwrap_or_else(|| match prefix {
            Some(prefix) => prefix.join("etc").join(APP_NAME).join(CONFIG_FILE_NAME),
            None => home.join(".config").join(APP_NAME).join(CONFIG_FILE_NAME),
        });
        let state_dir = state_override.unwrap_or_else(|| match prefix {
            Some(prefix) => prefix.join("var").join("lib").join(APP_NAME),
            None => home.join(".local").join("state").join(APP_NAME),
        });
        Self {
            home: home.to_path_buf(),
            prefix: prefix.map(Path::to_path_buf),
            config_file,
            state_dir,
        }
    }

    /// Everything under one directory; used by tests and `--state-dir` runs.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            home: root.to_path_buf(),
            prefix: None,
            config_file: root.join(CONFIG_FILE_NAME),
            state_dir: root.join("state"),
        }
    }

    pub fn machine_id_path(&self) -> PathBuf {
        self.state_dir.join(MACHINE_ID_FILE)
    }

    /// Where manual installs kept the identity before the state dir existed.
    pub fn legacy_machine_id_path(&self) -> PathBuf {
        self.home.join(".config").join(APP_NAME).join(MACHINE_ID_FILE)
    }

    pub fn dev_mode_path(&self) -> PathBuf {
        self.state_dir.join(DEV_MODE_FILE)
    }

    pub fn interlock_path(&self) -> PathBuf {
        self.state_dir.join(INTERLOCK_FILE)
    }

    /// `<state_dir>/<direction>.state.json`
    pub fn run_record_path(&self, direction: Direction) -> PathBuf {
        self.state_dir.join(format!("{direction}.state.json"))
    }

    /// `LOG_DIR` default when the config file does not set one.
    pub fn default_log_dir(&self) -> PathBuf {
        match &self.prefix {
            Some(prefix) => prefix.join("var").join("log").join(APP_NAME),
            None => self.state_dir.join("logs"),
        }
    }

    /// Default `WATCH_PATH`: chezmoi's own default source directory.
    pub fn default_watch_path(&self) -> PathBuf {
        self.home.join(".local").join("share").join("chezmoi")
    }

    /// Config file and state dir that differ from what `resolve` would pick
    /// with no overrides. Services installed from this layout must be told
    /// about them explicitly.
    pub fn overrides(&self) -> (Option<&Path>, Option<&Path>) {
        let defaults = Self::resolve_at(&self.home, self.prefix.as_deref(), None, None);
        let config = (self.config_file != defaults.config_file).then_some(self.config_file.as_path());
        let state = (self.state_dir != defaults.state_dir).then_some(self.state_dir.as_path());
        (config, state)
    }

    pub fn ensure_state_dir(&self) -> Result<(), CoreError> {
        ensure_dir(&self.state_dir)
    }
}

/// `<log_dir>/<direction>.log`: stdout target of the direction's service.
pub fn log_path(log_dir: &Path, direction: Direction) -> PathBuf {
    log_dir.join(format!("{direction}.log"))
}

/// `<log_dir>/<direction>.error.log`: stderr target of the direction's service.
pub fn error_log_path(log_dir: &Path, direction: Direction) -> PathBuf {
    log_dir.join(format!("{direction}.error.log"))
}

/// Create `dir` (mode `0700` on unix) when missing.
pub fn ensure_dir(dir: &Path) -> Result<(), CoreError> {
    if dir.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(dir).map_err(|e| crate::error::io_err(dir, e))?;
    set_dir_permissions(dir)
}

#[cfg(unix)]
fn set_dir_permissions(dir: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| crate::error::io_err(dir, e))
}

#[cfg(not(unix))]
fn set_dir_permissions(_dir: &Path) -> Result<(), CoreError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_layout_matches_package_locations() {
        let layout = Layout::resolve_at(
            Path::new("/Users/tester"),
            Some(Path::new("/opt/homebrew")),
            None,
            None,
        );
        assert_eq!(
            layout.config_file,
            PathBuf::from("/opt/homebrew/etc/chezmoi-sync/chezmoi-sync.conf")
        );
        assert_eq!(
            layout.machine_id_path(),
            PathBuf::from("/opt/homebrew/var/lib/chezmoi-sync/machine-id")
        );
        assert_eq!(
            layout.default_log_dir(),
            PathBuf::from("/opt/homebrew/var/log/chezmoi-sync")
        );
        assert_eq!(
            layout.legacy_machine_id_path(),
            PathBuf::from("/Users/tester/.config/chezmoi-sync/machine-id")
        );
    }

    #[test]
    fn home_layout_without_prefix() {
        let layout = Layout::resolve_at(Path::new("/home/tester"), None, None, None);
        assert_eq!(
            layout.state_dir,
            PathBuf::from("/home/tester/.local/state/chezmoi-sync")
        );
        assert_eq!(
            layout.run_record_path(Direction::Pull),
            PathBuf::from("/home/tester/.local/state/chezmoi-sync/pull.state.json")
        );
        assert_eq!(
            layout.default_watch_path(),
            PathBuf::from("/home/tester/.local/share/chezmoi")
        );
    }

    #[test]
    fn overrides_win() {
        let layout = Layout::resolve_at(
            Path::new("/home/tester"),
            Some(Path::new("/opt/homebrew")),
            Some(PathBuf::from("/tmp/custom.conf")),
            Some(PathBuf::from("/tmp/state")),
        );
        assert_eq!(layout.config_file, PathBuf::from("/tmp/custom.conf"));
        assert_eq!(layout.interlock_path(), PathBuf::from("/tmp/state/interlock.lock"));
        assert_eq!(
            layout.overrides(),
            (Some(Path::new("/tmp/custom.conf")), Some(Path::new("/tmp/state")))
        );

        let defaults = Layout::resolve_at(Path::new("/home/tester"), None, None, None);
        assert_eq!(defaults.overrides(), (None, None));
    }

    #[test]
    fn log_file_names_follow_direction() {
        let dir = Path::new("/var/log/chezmoi-sync");
        assert_eq!(log_path(dir, Direction::Push), dir.join("push.log"));
        assert_eq!(error_log_path(dir, Direction::Pull), dir.join("pull.error.log"));
    }
}
