//! Tool-output classification.
//!
//! The only place that looks at `git`/`chezmoi` text. Everything is matched
//! case-insensitively against stderr (and stdout where the tool uses it).

use crate::adapter::{FetchOutcome, PushOutcome};

const AUTH_PATTERNS: &[&str] = &[
    "authentication failed",
    "permission denied",
    "could not read username",
    "could not read password",
    "terminal prompts disabled",
    "host key verification failed",
    "invalid username or password",
    "the requested url returned error: 401",
    "the requested url returned error: 403",
];

const NETWORK_PATTERNS: &[&str] = &[
    "could not resolve host",
    "could not resolve hostname",
    "connection refused",
    "connection timed out",
    "operation timed out",
    "network is unreachable",
    "connection reset",
    "failed to connect",
    "unable to access",
    "the remote end hung up unexpectedly",
    "temporary failure in name resolution",
    "ssl_connect",
    "could not read from remote repository",
];

const NON_FAST_FORWARD_PATTERNS: &[&str] = &[
    "non-fast-forward",
    "[rejected]",
    "fetch first",
    "updates were rejected",
    "stale info",
];

const CONFLICT_PATTERNS: &[&str] = &[
    "conflict (",
    "automatic merge failed",
    "could not apply",
    "resolve all conflicts",
    "merge conflict",
];

const SKIP_MARKERS: &[&str] = &[
    "has changed since chezmoi last wrote it",
    "could not open a new tty",
    "skipping",
];

fn contains_any(text: &str, patterns: &[&str]) -> bool {
    let lower = text.to_ascii_lowercase();
    patterns.iter().any(|p| lower.contains(p))
}

/// Classify a failed `git push`. Auth wins over network: ssh prints both
/// "Permission denied" and "Could not read from remote repository".
pub fn push_failure(stderr: &str) -> PushOutcome {
    let msg = stderr.trim().to_string();
    if contains_any(stderr, NON_FAST_FORWARD_PATTERNS) {
        PushOutcome::NonFastForward
    } else if contains_any(stderr, AUTH_PATTERNS) {
        PushOutcome::AuthError(msg)
    } else if contains_any(stderr, NETWORK_PATTERNS) {
        PushOutcome::NetworkError(msg)
    } else {
        PushOutcome::Other(msg)
    }
}

/// Classify a failed `git fetch`.
pub fn fetch_failure(stderr: &str) -> FetchOutcome {
    let msg = stderr.trim().to_string();
    if contains_any(stderr, AUTH_PATTERNS) {
        FetchOutcome::AuthError(msg)
    } else if contains_any(stderr, NETWORK_PATTERNS) {
        FetchOutcome::NetworkError(msg)
    } else {
        FetchOutcome::Other(msg)
    }
}

/// True if a failed merge/rebase stopped on conflicting content.
pub fn is_conflict(output: &str) -> bool {
    contains_any(output, CONFLICT_PATTERNS)
}

/// True if `git commit` had nothing to record.
pub fn is_nothing_to_commit(output: &str) -> bool {
    contains_any(output, &["nothing to commit", "nothing added to commit", "no changes added to commit"])
}

/// Targets that `chezmoi apply --keep-going` declined to overwrite.
///
/// chezmoi reports each as `chezmoi: <target>: <reason>`; lines whose reason
/// is not a skip marker are left for the caller to treat as real errors.
pub fn skipped_targets(stderr: &str) -> Vec<String> {
    let mut targets = Vec::new();
    for line in stderr.lines() {
        let line = line.trim();
        if !contains_any(line, SKIP_MARKERS) {
            continue;
        }
        let rest = line.strip_prefix("chezmoi:").unwrap_or(line).trim();
        let target = rest.split(": ").next().unwrap_or(rest).trim();
        if !target.is_empty() && !targets.iter().any(|t| t == target) {
            targets.push(target.to_string());
        }
    }
    targets
}

/// True if every non-empty stderr line is a skip notice.
pub fn only_skips(stderr: &str) -> bool {
    let mut saw_any = false;
    for line in stderr.lines().map(str::trim).filter(|l| !l.is_empty()) {
        saw_any = true;
        if !contains_any(line, SKIP_MARKERS) {
            return false;
        }
    }
    saw_any
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(" ! [rejected]        main -> main (fetch first)\nerror: failed to push some refs")]
    #[case(" ! [rejected]        main -> main (non-fast-forward)")]
    #[case("hint: Updates were rejected because the tip of your current branch is behind")]
    fn non_fast_forward_push(#[case] stderr: &str) {
        assert_eq!(push_failure(stderr), PushOutcome::NonFastForward);
    }

    #[rstest]
    #[case("git@github.com: Permission denied (publickey).\nfatal: Could not read from remote repository.")]
    #[case("remote: Invalid username or password.\nfatal: Authentication failed for 'https://github.com/u/d.git/'")]
    #[case("fatal: could not read Username for 'https://github.com': terminal prompts disabled")]
    fn auth_push(#[case] stderr: &str) {
        assert!(matches!(push_failure(stderr), PushOutcome::AuthError(_)));
    }

    #[rstest]
    #[case("ssh: Could not resolve hostname github.com: nodename nor servname provided")]
    #[case("fatal: unable to access 'https://github.com/u/d.git/': Failed to connect to github.com port 443")]
    #[case("ssh: connect to host github.com port 22: Connection refused")]
    fn network_fetch(#[case] stderr: &str) {
        assert!(matches!(fetch_failure(stderr), FetchOutcome::NetworkError(_)));
    }

    #[test]
    fn unknown_fetch_failure_is_other_and_keeps_message() {
        assert_eq!(
            fetch_failure("fatal: couldn't find remote ref main\n"),
            FetchOutcome::Other("fatal: couldn't find remote ref main".to_string())
        );
    }

    #[rstest]
    #[case("CONFLICT (content): Merge conflict in dot_zshrc\nAutomatic merge failed; fix conflicts", true)]
    #[case("error: could not apply 1a2b3c4... edit\nhint: Resolve all conflicts manually", true)]
    #[case("fatal: Not possible to fast-forward, aborting.", false)]
    fn conflict_detection(#[case] output: &str, #[case] expected: bool) {
        assert_eq!(is_conflict(output), expected);
    }

    #[test]
    fn skipped_targets_are_extracted_once_each() {
        let stderr = "chezmoi: .zshrc: has changed since chezmoi last wrote it\n\
                      chezmoi: .zshrc: has changed since chezmoi last wrote it\n\
                      chezmoi: .gitconfig: could not open a new TTY: open /dev/tty: device not configured\n";
        assert_eq!(skipped_targets(stderr), vec![".zshrc", ".gitconfig"]);
        assert!(only_skips(stderr));
    }

    #[test]
    fn template_errors_are_not_skips() {
        let stderr = "chezmoi: .zshrc: has changed since chezmoi last wrote it\n\
                      chezmoi: template: dot_gitconfig.tmpl:3: function \"nope\" not defined\n";
        assert!(!only_skips(stderr));
        assert_eq!(skipped_targets(stderr), vec![".zshrc"]);
    }
}
