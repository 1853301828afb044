//! Push reactor: debounce, run gating and failure backoff.
//!
//! Pure state machine over [`tokio::time::Instant`]; the runtime feeds it
//! events and run results and sleeps until [`PushReactor::deadline`].

use std::time::Duration;

use tokio::time::Instant;

use chezmoi_sync_core::{ErrorCategory, RunOutcome, SkipReason};

/// Floor for the backoff base so a zero debounce still backs off.
pub const MIN_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Backoff cap as a multiple of the base.
pub const BACKOFF_CAP_FACTOR: u32 = 10;

/// Lower cap for unclassified adapter failures.
pub const ADAPTER_ABORT_CAP_FACTOR: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorState {
    Idle,
    Debouncing { deadline: Instant, burst_start: Instant },
    Running { pending: bool },
    Cooldown { until: Instant, pending: bool },
}

/// What the reactor needs to know about a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunResult {
    Success,
    /// The other direction held the interlock.
    Busy,
    Failed(ErrorCategory),
}

impl RunResult {
    pub fn from_outcome(outcome: &RunOutcome) -> Self {
        match outcome {
            RunOutcome::Skipped {
                reason: SkipReason::Busy,
            } => RunResult::Busy,
            RunOutcome::Failed { category, .. } if backs_off(*category) => {
                RunResult::Failed(*category)
            }
            _ => RunResult::Success,
        }
    }
}

/// Sticky conflicts already suppress automated runs; no backoff needed.
fn backs_off(category: ErrorCategory) -> bool {
    category.is_transient()
        || matches!(
            category,
            ErrorCategory::Auth | ErrorCategory::ExternalToolMissing
        )
}

#[derive(Debug, Clone)]
pub struct PushReactor {
    window: Duration,
    state: ReactorState,
    consecutive_failures: u32,
}

impl PushReactor {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: ReactorState::Idle,
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> ReactorState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Next instant at which [`Self::poll`] has work to do.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            ReactorState::Debouncing { deadline, .. } => Some(deadline),
            ReactorState::Cooldown { until, .. } => Some(until),
            ReactorState::Idle | ReactorState::Running { .. } => None,
        }
    }

    /// A change was observed in the source tree.
    pub fn on_event(&mut self, now: Instant) {
        self.state = match self.state {
            ReactorState::Idle => ReactorState::Debouncing {
                deadline: now + self.window,
                burst_start: now,
            },
            ReactorState::Debouncing { burst_start, .. } => ReactorState::Debouncing {
                deadline: (now + self.window).min(burst_start + self.window * 2),
                burst_start,
            },
            ReactorState::Running { .. } => ReactorState::Running { pending: true },
            ReactorState::Cooldown { until, .. } => ReactorState::Cooldown {
                until,
                pending: true,
            },
        };
    }

    /// Advance timers. Returns `true` when a pipeline run should start now.
    pub fn poll(&mut self, now: Instant) -> bool {
        if let ReactorState::Cooldown { until, pending } = self.state {
            if now < until {
                return false;
            }
            self.state = if pending {
                self.debounce_from(now)
            } else {
                ReactorState::Idle
            };
        }
        match self.state {
            ReactorState::Debouncing { deadline, .. } if now >= deadline => {
                self.state = ReactorState::Running { pending: false };
                true
            }
            _ => false,
        }
    }

    /// The run started by the last successful [`Self::poll`] has finished.
    pub fn on_finished(&mut self, result: RunResult, now: Instant) {
        let pending = match self.state {
            ReactorState::Running { pending } => pending,
            _ => false,
        };
        self.state = match result {
            RunResult::Success => {
                self.consecutive_failures = 0;
                if pending {
                    self.debounce_from(now)
                } else {
                    ReactorState::Idle
                }
            }
            RunResult::Busy => self.debounce_from(now),
            RunResult::Failed(category) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                ReactorState::Cooldown {
                    until: now + self.backoff(category),
                    pending,
                }
            }
        };
    }

    /// `base × 2^(n-1)` capped, where `base = max(window, 1 s)`.
    pub fn backoff(&self, category: ErrorCategory) -> Duration {
        let base = self.window.max(MIN_BACKOFF_BASE);
        let cap_factor = if category == ErrorCategory::AdapterAbort {
            ADAPTER_ABORT_CAP_FACTOR
        } else {
            BACKOFF_CAP_FACTOR
        };
        let exponent = self.consecutive_failures.saturating_sub(1).min(16);
        let factor = 2u32.saturating_pow(exponent).min(cap_factor);
        base * factor
    }

    fn debounce_from(&self, now: Instant) -> ReactorState {
        ReactorState::Debouncing {
            deadline: now + self.window,
            burst_start: now,
        }
    }
}
