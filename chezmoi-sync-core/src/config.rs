//! Config loader for the shell-style `chezmoi-sync.conf`.
//!
//! Format: one `KEY=VALUE` per line, `#` comments, optional `export ` prefix,
//! single- or double-quoted values. The only expansion performed is a leading
//! `~` and `$HOME` / `${HOME}`; the shipped file relies on those.
//!
//! Unknown keys are logged and ignored; invalid values fail the load.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::paths::Layout;

pub const DEFAULT_PULL_INTERVAL_SECONDS: u64 = 300;
pub const DEFAULT_PUSH_DEBOUNCE_SECONDS: u64 = 5;
pub const DEFAULT_COMMIT_MESSAGE_TEMPLATE: &str = "Auto-sync from {machine} at {timestamp}: {files}";
pub const DEFAULT_SHUTDOWN_GRACE_SECONDS: u64 = 10;

const MAX_PULL_INTERVAL_SECONDS: u64 = 86_400;
const MAX_PUSH_DEBOUNCE_SECONDS: u64 = 3_600;
const MAX_SHUTDOWN_GRACE_SECONDS: u64 = 300;

/// Placeholders accepted in `COMMIT_MESSAGE_TEMPLATE`.
pub const TEMPLATE_PLACEHOLDERS: &[&str] = &["machine", "timestamp", "files"];

/// Formatter used by the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// Validated runtime configuration. Read once at startup, immutable after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub log_dir: PathBuf,
    pub pull_interval: Duration,
    pub push_debounce: Duration,
    pub commit_message_template: String,
    pub remote_name: String,
    pub branch_name: String,
    pub watch_path: PathBuf,
    /// `true`: pulls fast-forward only. `false`: pulls merge with `merge_strategy`.
    pub auto_resolve: bool,
    pub merge_strategy: String,
    pub apply_after_push: bool,
    pub chezmoi_bin: String,
    pub git_bin: String,
    pub shutdown_grace: Duration,
    pub log_format: LogFormat,
}

impl SyncConfig {
    /// All defaults, resolved against `layout`.
    pub fn defaults(layout: &Layout) -> Self {
        Self {
            log_dir: layout.default_log_dir(),
            pull_interval: Duration::from_secs(DEFAULT_PULL_INTERVAL_SECONDS),
            push_debounce: Duration::from_secs(DEFAULT_PUSH_DEBOUNCE_SECONDS),
            commit_message_template: DEFAULT_COMMIT_MESSAGE_TEMPLATE.to_string(),
            remote_name: "origin".to_string(),
            branch_name: "main".to_string(),
            watch_path: layout.default_watch_path(),
            auto_resolve: true,
            merge_strategy: "ort".to_string(),
            apply_after_push: false,
            chezmoi_bin: "chezmoi".to_string(),
            git_bin: "git".to_string(),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECONDS),
            log_format: LogFormat::Text,
        }
    }

    /// Load `layout.config_file`. A missing file yields the defaults.
    pub fn load(layout: &Layout) -> Result<Self, ConfigError> {
        let path = &layout.config_file;
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "config file not found; using defaults");
                return Ok(Self::defaults(layout));
            }
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.clone(),
                    source: err,
                })
            }
        };
        Self::parse_str(&text, path, layout)
    }

    /// Parse config text. `path` is used only for error messages.
    pub fn parse_str(text: &str, path: &Path, layout: &Layout) -> Result<Self, ConfigError> {
        let mut config = Self::defaults(layout);
        let mut seen = HashSet::new();

        for entry in parse_entries(text, path)? {
            let Entry { line, key, value } = entry;
            let value = expand_home(&value, &layout.home);
            let invalid = |reason: String| ConfigError::InvalidValue {
                path: path.to_path_buf(),
                line,
                key: key.clone(),
                reason,
            };

            if !seen.insert(key.clone()) {
                tracing::warn!(key = %key, line, "duplicate config key; last value wins");
            }

            match key.as_str() {
                "LOG_DIR" => {
                    if value.is_empty() {
                        return Err(invalid("must not be empty".to_string()));
                    }
                    config.log_dir = PathBuf::from(value);
                }
                "PULL_INTERVAL_SECONDS" => {
                    let secs = parse_seconds(&value, 1, MAX_PULL_INTERVAL_SECONDS).map_err(invalid)?;
                    config.pull_interval = Duration::from_secs(secs);
                }
                "PUSH_DEBOUNCE_SECONDS" => {
                    let secs = parse_seconds(&value, 0, MAX_PUSH_DEBOUNCE_SECONDS).map_err(invalid)?;
                    config.push_debounce = Duration::from_secs(secs);
                }
                "COMMIT_MESSAGE_TEMPLATE" => {
                    validate_template(&value).map_err(invalid)?;
                    config.commit_message_template = value;
                }
                "REMOTE_NAME" => config.remote_name = parse_ref_name(&value).map_err(invalid)?,
                "BRANCH_NAME" => config.branch_name = parse_ref_name(&value).map_err(invalid)?,
                "WATCH_PATH" => {
                    let watch = PathBuf::from(&value);
                    if !watch.is_absolute() {
                        return Err(invalid(format!("'{value}' is not an absolute path")));
                    }
                    config.watch_path = watch;
                }
                "AUTO_RESOLVE" => config.auto_resolve = parse_bool(&value).map_err(invalid)?,
                "MERGE_STRATEGY" => config.merge_strategy = parse_ref_name(&value).map_err(invalid)?,
                "APPLY_AFTER_PUSH" => {
                    config.apply_after_push = parse_bool(&value).map_err(invalid)?;
                }
                "CHEZMOI_BIN" => config.chezmoi_bin = parse_non_empty(&value).map_err(invalid)?,
                "GIT_BIN" => config.git_bin = parse_non_empty(&value).map_err(invalid)?,
                "SHUTDOWN_GRACE_SECONDS" => {
                    let secs =
                        parse_seconds(&value, 0, MAX_SHUTDOWN_GRACE_SECONDS).map_err(invalid)?;
                    config.shutdown_grace = Duration::from_secs(secs);
                }
                "LOG_FORMAT" => {
                    config.log_format = match value.to_ascii_lowercase().as_str() {
                        "text" => LogFormat::Text,
                        "json" => LogFormat::Json,
                        other => return Err(invalid(format!("'{other}' is not one of: text, json"))),
                    };
                }
                other => {
                    tracing::warn!(key = other, line, path = %path.display(), "ignoring unknown config key");
                }
            }
        }

        Ok(config)
    }

    /// `<remote>/<branch>`
    pub fn upstream_ref(&self) -> String {
        format!("{}/{}", self.remote_name, self.branch_name)
    }
}

// ---------------------------------------------------------------------------
// Line parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    line: usize,
    key: String,
    value: String,
}

fn parse_entries(text: &str, path: &Path) -> Result<Vec<Entry>, ConfigError> {
    let mut entries = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed).trim_start();
        let syntax = || ConfigError::Syntax {
            path: path.to_path_buf(),
            line,
            text: raw.to_string(),
        };

        let (key, rest) = trimmed.split_once('=').ok_or_else(syntax)?;
        if !is_valid_key(key) {
            return Err(syntax());
        }
        let value = parse_value(rest).ok_or_else(syntax)?;
        entries.push(Entry {
            line,
            key: key.to_string(),
            value,
        });
    }
    Ok(entries)
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Returns `None` on an unterminated quote or trailing garbage after a quote.
fn parse_value(rest: &str) -> Option<String> {
    let rest = rest.trim_start();
    let mut chars = rest.chars();
    match chars.next() {
        Some('"') => {
            let mut out = String::new();
            let mut escaped = false;
            for (i, c) in rest.char_indices().skip(1) {
                if escaped {
                    out.push(c);
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    return trailing_ok(&rest[i + 1..]).then_some(out);
                } else {
                    out.push(c);
                }
            }
            None
        }
        Some('\'') => {
            let body = &rest[1..];
            let end = body.find('\'')?;
            trailing_ok(&body[end + 1..]).then(|| body[..end].to_string())
        }
        _ => {
            let value = match rest.find(" #").or_else(|| rest.find("\t#")) {
                Some(pos) => &rest[..pos],
                None => rest,
            };
            Some(value.trim().to_string())
        }
    }
}

fn trailing_ok(tail: &str) -> bool {
    let tail = tail.trim();
    tail.is_empty() || tail.starts_with('#')
}

fn expand_home(value: &str, home: &Path) -> String {
    let home = home.display().to_string();
    if value == "~" {
        return home;
    }
    let value = match value.strip_prefix("~/") {
        Some(rest) => format!("{home}/{rest}"),
        None => value.to_string(),
    };
    replace_home_var(&value.replace("${HOME}", &home), &home)
}

/// Expand bare `$HOME`, leaving longer names such as `$HOMEDIR` alone.
fn replace_home_var(value: &str, home: &str) -> String {
    const VAR: &str = "$HOME";
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(idx) = rest.find(VAR) {
        out.push_str(&rest[..idx]);
        let after = &rest[idx + VAR.len()..];
        if after.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_') {
            out.push_str(VAR);
        } else {
            out.push_str(home);
        }
        rest = after;
    }
    out.push_str(rest);
    out
}

// ---------------------------------------------------------------------------
// Value parsers
// ---------------------------------------------------------------------------

fn parse_seconds(value: &str, min: u64, max: u64) -> Result<u64, String> {
    let secs: u64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a non-negative integer"))?;
    if secs < min || secs > max {
        return Err(format!("{secs} is out of range ({min}..={max})"));
    }
    Ok(secs)
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(format!("'{other}' is not a boolean (true/false)")),
    }
}

fn parse_non_empty(value: &str) -> Result<String, String> {
    if value.is_empty() {
        Err("must not be empty".to_string())
    } else {
        Ok(value.to_string())
    }
}

fn parse_ref_name(value: &str) -> Result<String, String> {
    let value = parse_non_empty(value)?;
    if value.chars().any(char::is_whitespace) {
        return Err(format!("'{value}' must not contain whitespace"));
    }
    Ok(value)
}

fn validate_template(template: &str) -> Result<(), String> {
    if template.trim().is_empty() {
        return Err("must not be empty".to_string());
    }
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else { break };
        let name = &after[..close];
        let looks_like_placeholder =
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if looks_like_placeholder && !TEMPLATE_PLACEHOLDERS.contains(&name) {
            return Err(format!(
                "unknown placeholder {{{name}}}; expected one of: {}",
                TEMPLATE_PLACEHOLDERS
                    .iter()
                    .map(|p| format!("{{{p}}}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        rest = &after[close + 1..];
    }
    Ok(())
}
