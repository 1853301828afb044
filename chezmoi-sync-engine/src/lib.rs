//! # chezmoi-sync-engine
//!
//! Blocking control plane for chezmoi-sync: the dotfiles-tool adapter, the
//! cross-direction interlock and the push/pull pipelines.
//!
//! Build a [`SyncController`] from a [`chezmoi_sync_core::Layout`], a loaded
//! config and a [`DotfilesTool`] (normally [`ChezmoiGit`]), then call
//! [`SyncController::run_push`] or [`SyncController::run_pull`] from a
//! blocking thread.

pub mod adapter;
pub mod cancel;
pub mod chezmoi;
pub mod classify;
pub mod commit_message;
pub mod controller;
pub mod error;
pub mod interlock;
pub mod pipeline;
pub mod process;
pub mod redact;
pub mod status;

pub use adapter::{
    ApplyOutcome, CommitOutcome, Divergence, DotfilesTool, FetchOutcome, MergeOutcome,
    MergeStrategy, PushOutcome, Upstream,
};
pub use cancel::CancelToken;
pub use chezmoi::ChezmoiGit;
pub use controller::{manual_exit_code, SyncController};
pub use error::SyncError;
pub use interlock::{Interlock, InterlockGuard};
pub use status::{Health, ServiceStatus, StatusReport};
