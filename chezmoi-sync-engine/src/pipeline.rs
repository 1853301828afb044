//! Push and pull pipelines.
//!
//! Both run on a blocking thread while the caller holds the interlock, and
//! each returns exactly one [`RunOutcome`]. Adapter errors are folded in by
//! [`outcome_from_error`]; the stop flag is checked at every adapter boundary.

use chrono::Local;

use chezmoi_sync_core::{DevModeGate, ErrorCategory, MachineId, RunOutcome, SkipReason, Trigger};

use crate::adapter::{
    ApplyOutcome, CommitOutcome, DotfilesTool, FetchOutcome, MergeOutcome, MergeStrategy,
    PushOutcome, Upstream,
};
use crate::cancel::CancelToken;
use crate::commit_message;
use crate::error::SyncError;
use crate::redact::redact;

/// Push attempts before a repeated non-fast-forward counts as a lost race.
pub const MAX_PUSH_ATTEMPTS: u32 = 2;

/// Everything a pipeline reads; assembled per run by the controller.
pub struct PipelineContext<'a> {
    pub tool: &'a dyn DotfilesTool,
    pub upstream: &'a Upstream,
    pub dev_mode: &'a DevModeGate,
    pub machine: &'a MachineId,
    pub commit_template: &'a str,
    pub apply_after_push: bool,
    pub auto_resolve: bool,
    pub merge_strategy: &'a str,
    /// A sticky conflict is recorded for this direction.
    pub operator_required: bool,
}

impl PipelineContext<'_> {
    fn suppressed(&self, trigger: Trigger) -> bool {
        self.operator_required && trigger.is_automated()
    }

    fn pull_strategy(&self) -> MergeStrategy {
        if self.auto_resolve {
            MergeStrategy::FastForwardOnly
        } else {
            MergeStrategy::Merge {
                strategy: self.merge_strategy.to_string(),
            }
        }
    }
}

/// Fold an adapter error into a terminal outcome.
pub fn outcome_from_error(err: SyncError) -> RunOutcome {
    match err {
        SyncError::Cancelled | SyncError::Killed { .. } => RunOutcome::Cancelled,
        other => RunOutcome::failed(other.category(), redact(&other.to_string())),
    }
}

fn fetch_failure(outcome: FetchOutcome) -> Option<RunOutcome> {
    match outcome {
        FetchOutcome::Ok => None,
        FetchOutcome::NetworkError(m) => Some(RunOutcome::failed(ErrorCategory::Transient, m)),
        FetchOutcome::AuthError(m) => Some(RunOutcome::failed(ErrorCategory::Auth, m)),
        FetchOutcome::Other(m) => Some(RunOutcome::failed(ErrorCategory::AdapterAbort, m)),
    }
}

// ---------------------------------------------------------------------------
// Push
// ---------------------------------------------------------------------------

pub fn push(ctx: &PipelineContext<'_>, trigger: Trigger, cancel: &CancelToken) -> RunOutcome {
    push_steps(ctx, trigger, cancel).unwrap_or_else(outcome_from_error)
}

fn push_steps(
    ctx: &PipelineContext<'_>,
    trigger: Trigger,
    cancel: &CancelToken,
) -> Result<RunOutcome, SyncError> {
    let tool = ctx.tool;

    if ctx.dev_mode.is_enabled() {
        return Ok(RunOutcome::skipped(SkipReason::DevMode));
    }
    if ctx.suppressed(trigger) {
        return Ok(RunOutcome::skipped(SkipReason::OperatorRequired));
    }

    cancel.check()?;
    let dirty = tool.local_dirty(cancel)?;
    cancel.check()?;
    let ahead = tool.divergence(ctx.upstream, cancel)?.ahead;
    if !dirty && ahead == 0 {
        return Ok(RunOutcome::skipped(SkipReason::Clean));
    }

    if dirty {
        cancel.check()?;
        let paths = tool.changed_paths(cancel)?;
        let message =
            commit_message::compose(ctx.commit_template, ctx.machine, &Local::now(), &paths);
        cancel.check()?;
        if let CommitOutcome::NothingToCommit = tool.commit_all(&message, cancel)? {
            tracing::debug!("nothing staged after add");
            if ahead == 0 {
                return Ok(RunOutcome::skipped(SkipReason::Clean));
            }
        }
    }

    let mut rebases = 0;
    let mut attempt = 0;
    loop {
        attempt += 1;

        cancel.check()?;
        if let Some(failed) = fetch_failure(tool.fetch(ctx.upstream, cancel)?) {
            return Ok(failed);
        }
        cancel.check()?;
        let divergence = tool.divergence(ctx.upstream, cancel)?;
        if divergence.behind > 0 {
            cancel.check()?;
            match tool.fast_forward_or_merge(ctx.upstream, &MergeStrategy::Rebase, cancel)? {
                MergeOutcome::Rebased | MergeOutcome::Merged => rebases += 1,
                MergeOutcome::FastForwarded | MergeOutcome::UpToDate => {}
                MergeOutcome::Conflict(m) | MergeOutcome::Aborted(m) => {
                    return Ok(RunOutcome::failed(ErrorCategory::ConflictNeedsOperator, m));
                }
            }
        }
        if divergence.ahead == 0 {
            // Everything local is already upstream.
            return Ok(RunOutcome::Ok {
                commit: tool.head_commit(cancel)?,
                rebases,
                skipped_paths: Vec::new(),
            });
        }

        cancel.check()?;
        match tool.push(ctx.upstream, cancel)? {
            PushOutcome::Ok => break,
            PushOutcome::NonFastForward if attempt < MAX_PUSH_ATTEMPTS => {
                tracing::info!(attempt, "push rejected as non-fast-forward; refetching");
            }
            PushOutcome::NonFastForward => {
                return Ok(RunOutcome::failed(
                    ErrorCategory::RaceLost,
                    format!("upstream moved again after {rebases} rebase(s); next push will retry"),
                ));
            }
            PushOutcome::NetworkError(m) => {
                return Ok(RunOutcome::failed(ErrorCategory::Transient, m))
            }
            PushOutcome::AuthError(m) => return Ok(RunOutcome::failed(ErrorCategory::Auth, m)),
            PushOutcome::Other(m) => {
                return Ok(RunOutcome::failed(ErrorCategory::AdapterAbort, m))
            }
        }
    }

    let commit = tool.head_commit(cancel)?;
    let mut skipped_paths = Vec::new();
    if ctx.apply_after_push {
        cancel.check()?;
        match tool.apply(cancel)? {
            ApplyOutcome::Ok => {}
            ApplyOutcome::PartialSkip(paths) => skipped_paths = paths,
            ApplyOutcome::Error(m) => {
                return Ok(RunOutcome::failed(
                    ErrorCategory::AdapterAbort,
                    format!("pushed, but apply failed: {m}"),
                ));
            }
        }
    }

    Ok(RunOutcome::Ok {
        commit,
        rebases,
        skipped_paths,
    })
}

// ---------------------------------------------------------------------------
// Pull
// ---------------------------------------------------------------------------

pub fn pull(ctx: &PipelineContext<'_>, trigger: Trigger, cancel: &CancelToken) -> RunOutcome {
    pull_steps(ctx, trigger, cancel).unwrap_or_else(outcome_from_error)
}

fn pull_steps(
    ctx: &PipelineContext<'_>,
    trigger: Trigger,
    cancel: &CancelToken,
) -> Result<RunOutcome, SyncError> {
    let tool = ctx.tool;

    if ctx.dev_mode.is_enabled() {
        return Ok(RunOutcome::skipped(SkipReason::DevMode));
    }

    cancel.check()?;
    if let Some(failed) = fetch_failure(tool.fetch(ctx.upstream, cancel)?) {
        return Ok(failed);
    }

    if ctx.suppressed(trigger) {
        return Ok(RunOutcome::skipped(SkipReason::OperatorRequired));
    }

    cancel.check()?;
    if tool.local_dirty(cancel)? {
        return Ok(RunOutcome::failed(
            ErrorCategory::DeferredLocalChanges,
            "source tree has uncommitted changes; pull deferred",
        ));
    }

    let strategy = ctx.pull_strategy();
    cancel.check()?;
    let merged = tool.fast_forward_or_merge(ctx.upstream, &strategy, cancel)?;
    match merged {
        MergeOutcome::UpToDate => Ok(RunOutcome::ok()),
        MergeOutcome::FastForwarded | MergeOutcome::Merged | MergeOutcome::Rebased => {
            cancel.check()?;
            let commit = tool.head_commit(cancel)?;
            match tool.apply(cancel)? {
                ApplyOutcome::Ok => Ok(RunOutcome::Ok {
                    commit,
                    rebases: 0,
                    skipped_paths: Vec::new(),
                }),
                ApplyOutcome::PartialSkip(skipped_paths) => Ok(RunOutcome::Ok {
                    commit,
                    rebases: 0,
                    skipped_paths,
                }),
                ApplyOutcome::Error(m) => Ok(RunOutcome::failed(ErrorCategory::AdapterAbort, m)),
            }
        }
        MergeOutcome::Conflict(m) => Ok(RunOutcome::failed(ErrorCategory::ConflictNeedsOperator, m)),
        MergeOutcome::Aborted(m) if strategy == MergeStrategy::FastForwardOnly => {
            tracing::info!(reason = %m, "fast-forward refused; local commits not yet pushed");
            Ok(RunOutcome::failed(
                ErrorCategory::DeferredLocalChanges,
                "local commits not yet pushed; pull deferred",
            ))
        }
        MergeOutcome::Aborted(m) => Ok(RunOutcome::failed(ErrorCategory::AdapterAbort, m)),
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted in-memory [`DotfilesTool`] for pipeline and controller tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::adapter::Divergence;

    #[derive(Debug, Default)]
    pub struct Script {
        pub dirty: bool,
        /// Dirty, but every change is ignored so the commit stages nothing.
        pub nothing_staged: bool,
        pub paths: Vec<String>,
        pub divergences: VecDeque<Divergence>,
        pub fetches: VecDeque<FetchOutcome>,
        pub pushes: VecDeque<PushOutcome>,
        pub merges: VecDeque<MergeOutcome>,
        pub applies: VecDeque<ApplyOutcome>,
        pub calls: Vec<String>,
        pub messages: Vec<String>,
        pub strategies: Vec<MergeStrategy>,
    }

    #[derive(Debug, Default)]
    pub struct FakeTool {
        pub script: Mutex<Script>,
    }

    impl FakeTool {
        pub fn new(script: Script) -> Self {
            Self {
                script: Mutex::new(script),
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.script.lock().unwrap().calls.clone()
        }

        pub fn writes(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter(|c| matches!(c.as_str(), "commit_all" | "push" | "merge" | "apply"))
                .collect()
        }

        fn log(&self, call: &str) -> std::sync::MutexGuard<'_, Script> {
            let mut script = self.script.lock().unwrap();
            script.calls.push(call.to_string());
            script
        }
    }

    impl DotfilesTool for FakeTool {
        fn local_dirty(&self, _: &CancelToken) -> Result<bool, SyncError> {
            Ok(self.log("local_dirty").dirty)
        }

        fn changed_paths(&self, _: &CancelToken) -> Result<Vec<String>, SyncError> {
            Ok(self.log("changed_paths").paths.clone())
        }

        fn staged_changes(&self, _: &CancelToken) -> Result<Vec<String>, SyncError> {
            Ok(self.log("staged_changes").paths.clone())
        }

        fn commit_all(&self, message: &str, _: &CancelToken) -> Result<CommitOutcome, SyncError> {
            let mut script = self.log("commit_all");
            script.messages.push(message.to_string());
            let was_dirty = std::mem::replace(&mut script.dirty, false);
            Ok(if was_dirty && !script.nothing_staged {
                CommitOutcome::Committed { id: "c0ffee".into() }
            } else {
                CommitOutcome::NothingToCommit
            })
        }

        fn divergence(&self, _: &Upstream, _: &CancelToken) -> Result<Divergence, SyncError> {
            let mut script = self.log("divergence");
            if script.divergences.len() > 1 {
                Ok(script.divergences.pop_front().unwrap_or_default())
            } else {
                Ok(script.divergences.front().copied().unwrap_or_default())
            }
        }

        fn head_commit(&self, _: &CancelToken) -> Result<Option<String>, SyncError> {
            self.log("head_commit");
            Ok(Some("c0ffee".into()))
        }

        fn push(&self, _: &Upstream, _: &CancelToken) -> Result<PushOutcome, SyncError> {
            Ok(self.log("push").pushes.pop_front().unwrap_or(PushOutcome::Ok))
        }

        fn fetch(&self, _: &Upstream, _: &CancelToken) -> Result<FetchOutcome, SyncError> {
            Ok(self.log("fetch").fetches.pop_front().unwrap_or(FetchOutcome::Ok))
        }

        fn fast_forward_or_merge(
            &self,
            _: &Upstream,
            strategy: &MergeStrategy,
            _: &CancelToken,
        ) -> Result<MergeOutcome, SyncError> {
            let mut script = self.log("merge");
            script.strategies.push(strategy.clone());
            Ok(script.merges.pop_front().unwrap_or(MergeOutcome::UpToDate))
        }

        fn apply(&self, _: &CancelToken) -> Result<ApplyOutcome, SyncError> {
            Ok(self.log("apply").applies.pop_front().unwrap_or(ApplyOutcome::Ok))
        }
    }
}
