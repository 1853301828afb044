//! Production [`DotfilesTool`]: `git -C <source>` plus `chezmoi --source <source>`.

use std::path::{Path, PathBuf};
use std::process::Command;

use chezmoi_sync_core::SyncConfig;

use crate::adapter::{
    ApplyOutcome, CommitOutcome, Divergence, DotfilesTool, FetchOutcome, MergeOutcome,
    MergeStrategy, PushOutcome, Upstream,
};
use crate::cancel::CancelToken;
use crate::classify;
use crate::error::SyncError;
use crate::process::{self, describe_args, ProcessOutput};
use crate::redact::redact;

#[derive(Debug, Clone)]
pub struct ChezmoiGit {
    git_bin: String,
    chezmoi_bin: String,
    source: PathBuf,
}

impl ChezmoiGit {
    pub fn new(
        git_bin: impl Into<String>,
        chezmoi_bin: impl Into<String>,
        source: impl Into<PathBuf>,
    ) -> Self {
        Self {
            git_bin: git_bin.into(),
            chezmoi_bin: chezmoi_bin.into(),
            source: source.into(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(&config.git_bin, &config.chezmoi_bin, &config.watch_path)
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    fn git(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.git_bin);
        cmd.arg("-C")
            .arg(&self.source)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_EDITOR", "true")
            .env("GIT_MERGE_AUTOEDIT", "no");
        cmd
    }

    fn run_git(&self, args: &[&str], cancel: &CancelToken) -> Result<ProcessOutput, SyncError> {
        process::run(&mut self.git(args), cancel)
    }

    /// Like `run_git` but a non-zero exit becomes [`SyncError::Tool`].
    fn git_ok(&self, args: &[&str], cancel: &CancelToken) -> Result<ProcessOutput, SyncError> {
        let mut cmd = self.git(args);
        let output = process::run(&mut cmd, cancel)?;
        if output.success() {
            Ok(output)
        } else {
            Err(tool_error(&self.git_bin, &cmd, &output))
        }
    }

    fn rev_count(&self, range: &str, cancel: &CancelToken) -> Result<Option<u32>, SyncError> {
        let output = self.run_git(&["rev-list", "--count", range], cancel)?;
        if !output.success() {
            return Ok(None);
        }
        Ok(output.stdout.trim().parse().ok())
    }

    /// Best-effort cleanup after a stopped merge or rebase.
    fn abort(&self, what: &str, cancel: &CancelToken) {
        match self.run_git(&[what, "--abort"], cancel) {
            Ok(out) if out.success() => tracing::info!(op = what, "aborted in-progress integration"),
            Ok(out) => tracing::warn!(op = what, stderr = %redact(&out.stderr), "abort failed"),
            Err(err) => tracing::warn!(op = what, error = %err, "abort failed"),
        }
    }
}

fn tool_error(tool: &str, cmd: &Command, output: &ProcessOutput) -> SyncError {
    SyncError::Tool {
        tool: tool.to_string(),
        args: describe_args(cmd),
        status: output.status_label(),
        stderr: redact(&output.stderr),
    }
}

/// Paths from `git status --porcelain -z`. Renames report the new path.
fn parse_porcelain_z(stdout: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut entries = stdout.split('\0').filter(|e| !e.is_empty());
    while let Some(entry) = entries.next() {
        if entry.len() < 4 {
            continue;
        }
        let (status, path) = entry.split_at(3);
        paths.push(path.to_string());
        if status.starts_with('R') || status.starts_with('C') {
            // original path follows as its own entry
            entries.next();
        }
    }
    paths
}

impl DotfilesTool for ChezmoiGit {
    fn local_dirty(&self, cancel: &CancelToken) -> Result<bool, SyncError> {
        let output = self.git_ok(&["status", "--porcelain"], cancel)?;
        Ok(!output.stdout.trim().is_empty())
    }

    fn changed_paths(&self, cancel: &CancelToken) -> Result<Vec<String>, SyncError> {
        let output = self.git_ok(
            &["status", "--porcelain", "-z", "--untracked-files=all"],
            cancel,
        )?;
        Ok(parse_porcelain_z(&output.stdout))
    }

    fn staged_changes(&self, cancel: &CancelToken) -> Result<Vec<String>, SyncError> {
        let output = self.git_ok(&["diff", "--cached", "--name-only", "-z"], cancel)?;
        Ok(output
            .stdout
            .split('\0')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn commit_all(&self, message: &str, cancel: &CancelToken) -> Result<CommitOutcome, SyncError> {
        self.git_ok(&["add", "-A"], cancel)?;
        if self.staged_changes(cancel)?.is_empty() {
            return Ok(CommitOutcome::NothingToCommit);
        }
        let mut cmd = self.git(&["commit", "--quiet", "-m", message]);
        let output = process::run(&mut cmd, cancel)?;
        if !output.success() {
            if classify::is_nothing_to_commit(&output.combined()) {
                return Ok(CommitOutcome::NothingToCommit);
            }
            return Err(tool_error(&self.git_bin, &cmd, &output));
        }
        let id = self.head_commit(cancel)?.unwrap_or_default();
        tracing::info!(commit = %id, "committed local changes");
        Ok(CommitOutcome::Committed { id })
    }

    fn divergence(
        &self,
        upstream: &Upstream,
        cancel: &CancelToken,
    ) -> Result<Divergence, SyncError> {
        let range = format!("HEAD...{}", upstream.tracking_ref());
        let output = self.run_git(&["rev-list", "--left-right", "--count", &range], cancel)?;
        if output.success() {
            let mut counts = output.stdout.split_whitespace().map(|n| n.parse::<u32>());
            if let (Some(Ok(ahead)), Some(Ok(behind))) = (counts.next(), counts.next()) {
                return Ok(Divergence { ahead, behind });
            }
        }
        // Upstream branch not created yet: everything local is ahead.
        let ahead = self.rev_count("HEAD", cancel)?.unwrap_or(0);
        tracing::debug!(upstream = %upstream.tracking_ref(), ahead, "upstream ref not found");
        Ok(Divergence { ahead, behind: 0 })
    }

    fn head_commit(&self, cancel: &CancelToken) -> Result<Option<String>, SyncError> {
        let output = self.run_git(&["rev-parse", "--verify", "--quiet", "HEAD"], cancel)?;
        if !output.success() {
            return Ok(None);
        }
        let id = output.stdout.trim();
        Ok((!id.is_empty()).then(|| id.to_string()))
    }

    fn push(&self, upstream: &Upstream, cancel: &CancelToken) -> Result<PushOutcome, SyncError> {
        let refspec = format!("HEAD:refs/heads/{}", upstream.branch);
        let output = self.run_git(&["push", "--porcelain", &upstream.remote, &refspec], cancel)?;
        if output.success() {
            return Ok(PushOutcome::Ok);
        }
        // --porcelain puts the rejection line on stdout
        let outcome = classify::push_failure(&redact(&output.combined()));
        tracing::warn!(stderr = %redact(&output.stderr), outcome = ?outcome, "git push failed");
        Ok(outcome)
    }

    fn fetch(&self, upstream: &Upstream, cancel: &CancelToken) -> Result<FetchOutcome, SyncError> {
        let output = self.run_git(&["fetch", "--prune", "--quiet", &upstream.remote], cancel)?;
        if output.success() {
            return Ok(FetchOutcome::Ok);
        }
        let outcome = classify::fetch_failure(&redact(&output.stderr));
        tracing::warn!(stderr = %redact(&output.stderr), outcome = ?outcome, "git fetch failed");
        Ok(outcome)
    }

    fn fast_forward_or_merge(
        &self,
        upstream: &Upstream,
        strategy: &MergeStrategy,
        cancel: &CancelToken,
    ) -> Result<MergeOutcome, SyncError> {
        let divergence = self.divergence(upstream, cancel)?;
        if divergence.behind == 0 {
            return Ok(MergeOutcome::UpToDate);
        }
        let target = upstream.tracking_ref();

        match strategy {
            MergeStrategy::FastForwardOnly => {
                let output = self.run_git(&["merge", "--ff-only", "--quiet", &target], cancel)?;
                if output.success() {
                    Ok(MergeOutcome::FastForwarded)
                } else {
                    Ok(MergeOutcome::Aborted(redact(&output.stderr)))
                }
            }
            MergeStrategy::Merge { strategy } => {
                let output = self.run_git(
                    &["merge", "--no-edit", "--quiet", "-s", strategy, &target],
                    cancel,
                )?;
                if output.success() {
                    return Ok(if divergence.ahead == 0 {
                        MergeOutcome::FastForwarded
                    } else {
                        MergeOutcome::Merged
                    });
                }
                let text = output.combined();
                if classify::is_conflict(&text) {
                    tracing::warn!(stderr = %redact(&text), "merge stopped on conflict");
                    self.abort("merge", cancel);
                    Ok(MergeOutcome::Conflict(redact(&text)))
                } else {
                    Ok(MergeOutcome::Aborted(redact(&output.stderr)))
                }
            }
            MergeStrategy::Rebase => {
                let output = self.run_git(&["rebase", "--quiet", &target], cancel)?;
                if output.success() {
                    return Ok(if divergence.ahead == 0 {
                        MergeOutcome::FastForwarded
                    } else {
                        MergeOutcome::Rebased
                    });
                }
                let text = output.combined();
                // A failed rebase can leave state behind even without a conflict.
                self.abort("rebase", cancel);
                if classify::is_conflict(&text) {
                    tracing::warn!(stderr = %redact(&text), "rebase stopped on conflict");
                    Ok(MergeOutcome::Conflict(redact(&text)))
                } else {
                    Ok(MergeOutcome::Aborted(redact(&output.stderr)))
                }
            }
        }
    }

    fn apply(&self, cancel: &CancelToken) -> Result<ApplyOutcome, SyncError> {
        let mut cmd = Command::new(&self.chezmoi_bin);
        cmd.arg("--source")
            .arg(&self.source)
            .args(["--no-tty", "apply", "--keep-going"]);
        let output = process::run(&mut cmd, cancel)?;
        let skipped = classify::skipped_targets(&output.stderr);

        if output.success() || classify::only_skips(&output.stderr) {
            if skipped.is_empty() {
                return Ok(ApplyOutcome::Ok);
            }
            tracing::warn!(targets = ?skipped, "chezmoi declined to overwrite modified targets");
            return Ok(ApplyOutcome::PartialSkip(skipped));
        }

        tracing::warn!(stderr = %redact(&output.stderr), status = %output.status_label(), "chezmoi apply failed");
        Ok(ApplyOutcome::Error(redact(&output.stderr)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn porcelain_z_reports_new_path_for_renames() {
        let out = " M dot_zshrc\0R  dot_new\0dot_old\0?? private_dot_ssh/config\0";
        assert_eq!(
            parse_porcelain_z(out),
            vec!["dot_zshrc", "dot_new", "private_dot_ssh/config"]
        );
    }

    #[test]
    fn porcelain_z_empty_is_no_paths() {
        assert!(parse_porcelain_z("").is_empty());
    }
}
