//! `SyncController`: the daemon's mutable state behind two entry points.
//!
//! `run_push` and `run_pull` take the interlock, reload the direction's run
//! record, execute the pipeline, then record and persist the outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use chezmoi_sync_core::{
    run_record, DevModeGate, Direction, Layout, MachineId, RunOutcome, RunRecord, SkipReason,
    SyncConfig, Trigger,
};

use crate::adapter::{DotfilesTool, Upstream};
use crate::cancel::CancelToken;
use crate::interlock::{Interlock, InterlockGuard};
use crate::pipeline::{self, outcome_from_error, PipelineContext};

/// How long an operator-initiated run waits for the other direction.
pub const MANUAL_LOCK_WAIT: Duration = Duration::from_secs(60);

/// Floor for the automated push lock wait (debounce may be zero).
pub const MIN_AUTOMATED_LOCK_WAIT: Duration = Duration::from_secs(1);

pub struct SyncController {
    layout: Layout,
    config: SyncConfig,
    machine: MachineId,
    tool: Arc<dyn DotfilesTool>,
    interlock: Interlock,
    dev_mode: DevModeGate,
    upstream: Upstream,
}

impl SyncController {
    pub fn new(
        layout: Layout,
        config: SyncConfig,
        machine: MachineId,
        tool: Arc<dyn DotfilesTool>,
    ) -> Self {
        let interlock = Interlock::new(layout.interlock_path());
        let dev_mode = DevModeGate::new(layout.dev_mode_path());
        let upstream = Upstream::new(&config.remote_name, &config.branch_name);
        Self {
            layout,
            config,
            machine,
            tool,
            interlock,
            dev_mode,
            upstream,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn interlock(&self) -> &Interlock {
        &self.interlock
    }

    pub fn dev_mode(&self) -> &DevModeGate {
        &self.dev_mode
    }

    pub fn machine(&self) -> &MachineId {
        &self.machine
    }

    /// Lock wait for a push: `max(debounce, 1 s)` when automated.
    pub fn push_lock_wait(&self, trigger: Trigger) -> Duration {
        if trigger.is_automated() {
            self.config.push_debounce.max(MIN_AUTOMATED_LOCK_WAIT)
        } else {
            MANUAL_LOCK_WAIT
        }
    }

    /// One push pipeline run. Never panics on tool failure; the outcome says it.
    pub fn run_push(&self, trigger: Trigger, cancel: &CancelToken) -> RunOutcome {
        let started = Instant::now();
        let outcome = if self.dev_mode.is_enabled() {
            RunOutcome::skipped(SkipReason::DevMode)
        } else {
            match self
                .interlock
                .acquire(Direction::Push, self.push_lock_wait(trigger), cancel)
            {
                Ok(Some(guard)) => return self.locked_run(Direction::Push, guard, trigger, cancel, started),
                Ok(None) => RunOutcome::skipped(SkipReason::Busy),
                Err(err) => outcome_from_error(err),
            }
        };
        self.finish(Direction::Push, outcome, trigger, started)
    }

    /// One pull pipeline run. Automated ticks never wait for the interlock.
    pub fn run_pull(&self, trigger: Trigger, cancel: &CancelToken) -> RunOutcome {
        let started = Instant::now();
        let acquired = if self.dev_mode.is_enabled() {
            Err(RunOutcome::skipped(SkipReason::DevMode))
        } else if trigger.is_automated() {
            self.interlock.try_acquire(Direction::Pull).map_err(outcome_from_error)
        } else {
            self.interlock
                .acquire(Direction::Pull, MANUAL_LOCK_WAIT, cancel)
                .map_err(outcome_from_error)
        };
        let outcome = match acquired {
            Ok(Some(guard)) => return self.locked_run(Direction::Pull, guard, trigger, cancel, started),
            Ok(None) => RunOutcome::skipped(SkipReason::Busy),
            Err(outcome) => outcome,
        };
        self.finish(Direction::Pull, outcome, trigger, started)
    }

    fn locked_run(
        &self,
        direction: Direction,
        guard: InterlockGuard,
        trigger: Trigger,
        cancel: &CancelToken,
        started: Instant,
    ) -> RunOutcome {
        let record = self.load_record(direction);
        let ctx = PipelineContext {
            tool: self.tool.as_ref(),
            upstream: &self.upstream,
            dev_mode: &self.dev_mode,
            machine: &self.machine,
            commit_template: &self.config.commit_message_template,
            apply_after_push: self.config.apply_after_push,
            auto_resolve: self.config.auto_resolve,
            merge_strategy: &self.config.merge_strategy,
            operator_required: record.blocks_automation(),
        };
        let outcome = match direction {
            Direction::Push => pipeline::push(&ctx, trigger, cancel),
            Direction::Pull => pipeline::pull(&ctx, trigger, cancel),
        };
        let outcome = self.finish_with(record, outcome, trigger, started);
        drop(guard);
        outcome
    }

    fn load_record(&self, direction: Direction) -> RunRecord {
        match run_record::load_at(&self.layout, direction) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(direction = %direction, error = %err, "unreadable run record; starting fresh");
                RunRecord::new(direction)
            }
        }
    }

    fn finish(
        &self,
        direction: Direction,
        outcome: RunOutcome,
        trigger: Trigger,
        started: Instant,
    ) -> RunOutcome {
        let record = self.load_record(direction);
        self.finish_with(record, outcome, trigger, started)
    }

    fn finish_with(
        &self,
        mut record: RunRecord,
        outcome: RunOutcome,
        trigger: Trigger,
        started: Instant,
    ) -> RunOutcome {
        let direction = record.direction;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        log_outcome(direction, trigger, &outcome, elapsed_ms);

        record.record(outcome.clone(), trigger, Utc::now());
        if let Err(err) = run_record::save_at(&self.layout, &record) {
            tracing::error!(direction = %direction, error = %err, "failed to persist run record");
        }
        outcome
    }
}

fn log_outcome(direction: Direction, trigger: Trigger, outcome: &RunOutcome, elapsed_ms: u64) {
    let summary = outcome.summary();
    match outcome {
        RunOutcome::Failed { category, message } if !category.is_informational() => {
            tracing::warn!(%direction, %trigger, outcome = %summary, error = %message, elapsed_ms, "{direction} run failed");
        }
        RunOutcome::Skipped { .. } => {
            tracing::debug!(%direction, %trigger, outcome = %summary, elapsed_ms, "{direction} run skipped");
        }
        _ => {
            tracing::info!(%direction, %trigger, outcome = %summary, elapsed_ms, "{direction} run finished");
        }
    }
}

/// Exit code for a manual `push`/`pull`: 0 success or benign skip,
/// 75 retryable, 78 config, 127 missing tool, 1 otherwise.
pub fn manual_exit_code(outcome: &RunOutcome) -> i32 {
    use chezmoi_sync_core::ErrorCategory::*;
    match outcome {
        o if o.is_success() => 0,
        RunOutcome::Skipped { reason: SkipReason::Busy } => 75,
        RunOutcome::Skipped { .. } | RunOutcome::Cancelled => 1,
        RunOutcome::Failed { category, .. } => match category {
            ConfigInvalid => 78,
            ExternalToolMissing => 127,
            c if c.is_transient() => 75,
            _ => 1,
        },
        RunOutcome::Ok { .. } => 0,
    }
}
