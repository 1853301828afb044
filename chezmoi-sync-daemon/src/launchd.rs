use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use chezmoi_sync_core::paths::{error_log_path, log_path};
use chezmoi_sync_core::{Direction, Layout, SyncConfig};

use crate::error::{io_err, DaemonError};
use crate::paths::{launch_agents_dir, plist_path, service_label, LEGACY_LABELS};

const SYSTEM_PATH: &str = "/usr/local/bin:/opt/homebrew/bin:/usr/bin:/bin:/usr/sbin:/sbin";

/// Inputs for one service manifest.
#[derive(Debug, Clone)]
pub struct ManifestSpec {
    pub direction: Direction,
    pub binary: PathBuf,
    pub watch_path: PathBuf,
    pub log_dir: PathBuf,
    pub push_debounce_seconds: u64,
    pub pull_interval_seconds: u64,
    pub path_env: String,
    pub prefix: Option<PathBuf>,
    /// Passed as `--config` when the installer ran with a non-default file.
    pub config_file: Option<PathBuf>,
    /// Passed as `--state-dir` when the installer ran with a non-default dir.
    pub state_dir: Option<PathBuf>,
}

impl ManifestSpec {
    pub fn from_config(
        direction: Direction,
        binary: &Path,
        config: &SyncConfig,
        layout: &Layout,
    ) -> Self {
        let prefix = layout.prefix.as_deref();
        let (config_file, state_dir) = layout.overrides();
        Self {
            direction,
            binary: binary.to_path_buf(),
            watch_path: config.watch_path.clone(),
            log_dir: config.log_dir.clone(),
            push_debounce_seconds: config.push_debounce.as_secs(),
            pull_interval_seconds: config.pull_interval.as_secs(),
            path_env: default_path_env(prefix),
            prefix: prefix.map(Path::to_path_buf),
            config_file: config_file.map(Path::to_path_buf),
            state_dir: state_dir.map(Path::to_path_buf),
        }
    }
}

/// `PATH` for launchd jobs: the package prefix first, then the usual system dirs.
pub fn default_path_env(prefix: Option<&Path>) -> String {
    match prefix {
        Some(prefix) => format!("{}:{SYSTEM_PATH}", prefix.join("bin").display()),
        None => SYSTEM_PATH.to_string(),
    }
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn xml_path(path: &Path) -> String {
    xml_escape(&path.display().to_string())
}

/// Render the launchd plist for one direction.
pub fn generate_plist(spec: &ManifestSpec) -> String {
    let direction = spec.direction;
    let trigger = match direction {
        Direction::Push => format!(
            r#"  <key>WatchPaths</key>
  <array>
    <string>{watch}</string>
  </array>
  <key>ThrottleInterval</key>
  <integer>{throttle}</integer>
"#,
            watch = xml_path(&spec.watch_path),
            throttle = spec.push_debounce_seconds,
        ),
        Direction::Pull => format!(
            r#"  <key>StartInterval</key>
  <integer>{interval}</integer>
"#,
            interval = spec.pull_interval_seconds,
        ),
    };
    let prefix_env = spec
        .prefix
        .as_deref()
        .map(|p| {
            format!(
                "    <key>HOMEBREW_PREFIX</key>\n    <string>{}</string>\n",
                xml_path(p)
            )
        })
        .unwrap_or_default();
    let mut overrides = String::new();
    if let Some(config) = &spec.config_file {
        overrides.push_str(&format!(
            "    <string>--config</string>\n    <string>{}</string>\n",
            xml_path(config)
        ));
    }
    if let Some(state_dir) = &spec.state_dir {
        overrides.push_str(&format!(
            "    <string>--state-dir</string>\n    <string>{}</string>\n",
            xml_path(state_dir)
        ));
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
  <key>Label</key>
  <string>{label}</string>
  <key>ProgramArguments</key>
  <array>
    <string>{binary}</string>
    <string>daemon</string>
    <string>run</string>
    <string>--direction</string>
    <string>{direction}</string>
{overrides}  </array>
{trigger}  <key>RunAtLoad</key>
  <true/>
  <key>KeepAlive</key>
  <true/>
  <key>EnvironmentVariables</key>
  <dict>
    <key>PATH</key>
    <string>{path_env}</string>
{prefix_env}  </dict>
  <key>StandardOutPath</key>
  <string>{stdout}</string>
  <key>StandardErrorPath</key>
  <string>{stderr}</string>
</dict>
</plist>
"#,
        label = service_label(direction),
        binary = xml_path(&spec.binary),
        direction = direction,
        overrides = overrides,
        trigger = trigger,
        path_env = xml_escape(&spec.path_env),
        prefix_env = prefix_env,
        stdout = xml_path(&log_path(&spec.log_dir, direction)),
        stderr = xml_path(&error_log_path(&spec.log_dir, direction)),
    )
}

/// Write both manifests. Services are not loaded; see [`start`].
///
/// Agents left by the old autopush/autopull scripts are unloaded and removed
/// first: they sync without taking the interlock.
pub fn install(home: &Path, specs: &[ManifestSpec]) -> Result<Vec<PathBuf>, DaemonError> {
    let launch_agents = launch_agents_dir(home);
    fs::create_dir_all(&launch_agents).map_err(|e| io_err(&launch_agents, e))?;
    remove_legacy_agents(&launch_agents)?;

    let mut written = Vec::new();
    for spec in specs {
        fs::create_dir_all(&spec.log_dir).map_err(|e| io_err(&spec.log_dir, e))?;
        let plist = plist_path(home, spec.direction);
        let tmp = plist.with_extension("plist.tmp");
        fs::write(&tmp, generate_plist(spec)).map_err(|e| io_err(&tmp, e))?;
        fs::rename(&tmp, &plist).map_err(|e| io_err(&plist, e))?;
        tracing::info!(path = %plist.display(), "wrote launchd manifest");
        written.push(plist);
    }
    Ok(written)
}

fn remove_legacy_agents(launch_agents: &Path) -> Result<(), DaemonError> {
    for label in LEGACY_LABELS {
        let plist = launch_agents.join(format!("{label}.plist"));
        if !plist.exists() {
            continue;
        }
        if cfg!(target_os = "macos") {
            let service = format!("{}/{label}", launchctl_domain()?);
            let _ = run_launchctl(&["bootout", &service], true);
        }
        fs::remove_file(&plist).map_err(|e| io_err(&plist, e))?;
        tracing::info!(label, path = %plist.display(), "removed legacy launchd agent");
    }
    Ok(())
}

/// Boot out both services (if loaded) and remove their manifests.
pub fn uninstall(home: &Path) -> Result<(), DaemonError> {
    for direction in Direction::all() {
        let plist = plist_path(home, *direction);
        if !plist.exists() {
            continue;
        }
        if cfg!(target_os = "macos") {
            let service = format!("{}/{}", launchctl_domain()?, service_label(*direction));
            let _ = run_launchctl(&["bootout", &service], true);
        }
        fs::remove_file(&plist).map_err(|e| io_err(&plist, e))?;
    }
    Ok(())
}

/// Load both services. Already-loaded services are left alone.
pub fn start(home: &Path) -> Result<(), DaemonError> {
    ensure_macos()?;
    let domain = launchctl_domain()?;
    for direction in Direction::all() {
        let plist = plist_path(home, *direction);
        if !plist.exists() {
            return Err(DaemonError::Launchd(format!(
                "{} is not installed; run `chezmoi-sync daemon install` first",
                plist.display()
            )));
        }
        if let ServiceState::Loaded { .. } = service_state(*direction) {
            continue;
        }
        let plist = plist.display().to_string();
        run_launchctl(&["bootstrap", &domain, &plist], false)?;
    }
    Ok(())
}

/// Unload both services. Their manifests stay in place.
pub fn stop() -> Result<(), DaemonError> {
    ensure_macos()?;
    let domain = launchctl_domain()?;
    for direction in Direction::all() {
        if let ServiceState::Loaded { .. } = service_state(*direction) {
            let service = format!("{domain}/{}", service_label(*direction));
            run_launchctl(&["bootout", &service], false)?;
        }
    }
    Ok(())
}

/// Kill and relaunch both services.
pub fn restart() -> Result<(), DaemonError> {
    ensure_macos()?;
    let domain = launchctl_domain()?;
    for direction in Direction::all() {
        let service = format!("{domain}/{}", service_label(*direction));
        run_launchctl(&["kickstart", "-k", &service], false)?;
    }
    Ok(())
}

/// What launchd reports for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceState {
    Loaded { state: String, pid: Option<u32> },
    NotLoaded,
    Unsupported,
}

impl ServiceState {
    pub fn describe(&self) -> String {
        match self {
            ServiceState::Loaded {
                state,
                pid: Some(pid),
            } => format!("{state} (pid {pid})"),
            ServiceState::Loaded { state, pid: None } => state.clone(),
            ServiceState::NotLoaded => "not loaded".to_string(),
            ServiceState::Unsupported => "unsupported platform".to_string(),
        }
    }
}

pub fn service_state(direction: Direction) -> ServiceState {
    if ensure_macos().is_err() {
        return ServiceState::Unsupported;
    }
    let Ok(domain) = launchctl_domain() else {
        return ServiceState::NotLoaded;
    };
    let service = format!("{domain}/{}", service_label(direction));
    match Command::new("launchctl").args(["print", &service]).output() {
        Ok(output) if output.status.success() => {
            parse_print(&String::from_utf8_lossy(&output.stdout))
        }
        _ => ServiceState::NotLoaded,
    }
}

/// Pull `state = …` and `pid = …` out of `launchctl print`.
fn parse_print(output: &str) -> ServiceState {
    let mut state = None;
    let mut pid = None;
    for line in output.lines() {
        let Some((key, value)) = line.trim().split_once(" = ") else {
            continue;
        };
        match key {
            "state" if state.is_none() => state = Some(value.trim().to_string()),
            "pid" if pid.is_none() => pid = value.trim().parse().ok(),
            _ => {}
        }
    }
    ServiceState::Loaded {
        state: state.unwrap_or_else(|| "loaded".to_string()),
        pid,
    }
}

#[cfg(target_os = "macos")]
fn ensure_macos() -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn ensure_macos() -> Result<(), DaemonError> {
    Err(DaemonError::Launchd(
        "launchd management is only supported on macOS".to_string(),
    ))
}

fn run_launchctl(args: &[&str], ignore_failure: bool) -> Result<(), DaemonError> {
    let output = Command::new("launchctl")
        .args(args)
        .output()
        .map_err(|e| io_err("launchctl", e))?;

    if output.status.success() || ignore_failure {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Err(DaemonError::Launchd(format!(
        "launchctl {} failed (status {}): {} {}",
        args.join(" "),
        output.status,
        stdout,
        stderr
    )))
}

fn launchctl_domain() -> Result<String, DaemonError> {
    let output = Command::new("id")
        .arg("-u")
        .output()
        .map_err(|e| io_err("id -u", e))?;
    if !output.status.success() {
        return Err(DaemonError::Launchd(format!(
            "failed to resolve current uid (status {})",
            output.status
        )));
    }

    let uid = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if uid.is_empty() {
        return Err(DaemonError::Launchd(
            "current uid from `id -u` was empty".to_string(),
        ));
    }
    Ok(format!("gui/{uid}"))
}
