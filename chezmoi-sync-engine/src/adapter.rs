//! The dotfiles-tool façade.
//!
//! Pipelines branch only on the enums below; translating raw tool output
//! into them is the job of [`crate::classify`].

use crate::cancel::CancelToken;
use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { id: String },
    NothingToCommit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Divergence {
    /// Local commits not on the upstream.
    pub ahead: u32,
    /// Upstream commits not in HEAD.
    pub behind: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Ok,
    NonFastForward,
    NetworkError(String),
    AuthError(String),
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Ok,
    NetworkError(String),
    AuthError(String),
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStrategy {
    FastForwardOnly,
    /// `git merge -s <strategy>`.
    Merge { strategy: String },
    Rebase,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    UpToDate,
    FastForwarded,
    Merged,
    Rebased,
    /// The adapter already aborted the merge or rebase.
    Conflict(String),
    /// The integration was refused without touching the tree.
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Ok,
    PartialSkip(Vec<String>),
    Error(String),
}

/// Remote-tracking branch a pipeline syncs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub remote: String,
    pub branch: String,
}

impl Upstream {
    pub fn new(remote: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            branch: branch.into(),
        }
    }

    /// `<remote>/<branch>`
    pub fn tracking_ref(&self) -> String {
        format!("{}/{}", self.remote, self.branch)
    }
}

/// Operations the push and pull pipelines need from `chezmoi` + `git`.
///
/// Every call takes the run's [`CancelToken`] so a kill during shutdown
/// reaches the running subprocess.
pub trait DotfilesTool: Send + Sync {
    fn local_dirty(&self, cancel: &CancelToken) -> Result<bool, SyncError>;

    fn changed_paths(&self, cancel: &CancelToken) -> Result<Vec<String>, SyncError>;

    fn staged_changes(&self, cancel: &CancelToken) -> Result<Vec<String>, SyncError>;

    fn commit_all(&self, message: &str, cancel: &CancelToken) -> Result<CommitOutcome, SyncError>;

    fn divergence(&self, upstream: &Upstream, cancel: &CancelToken)
        -> Result<Divergence, SyncError>;

    fn head_commit(&self, cancel: &CancelToken) -> Result<Option<String>, SyncError>;

    fn push(&self, upstream: &Upstream, cancel: &CancelToken) -> Result<PushOutcome, SyncError>;

    fn fetch(&self, upstream: &Upstream, cancel: &CancelToken) -> Result<FetchOutcome, SyncError>;

    fn fast_forward_or_merge(
        &self,
        upstream: &Upstream,
        strategy: &MergeStrategy,
        cancel: &CancelToken,
    ) -> Result<MergeOutcome, SyncError>;

    fn apply(&self, cancel: &CancelToken) -> Result<ApplyOutcome, SyncError>;
}
