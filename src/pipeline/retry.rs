//! Attempt ceiling, backoff, timeouts and pacing for media uploads.
//!
//! The attempt loop is an explicit state machine:
//!
//! ```text
//!             ┌──────────── Waiting(delay) ◀───┐
//!             ▼                                │ retryable, attempts left
//! start ─▶ Attempting(n) ──fail──▶ classify ───┤
//!             │                                │ terminal        ─▶ Terminal
//!             │ ok                             │ ceiling reached ─▶ Exhausted
//!             ▼
//!         Succeeded
//! ```
//!
//! [`RetryState::begin_attempt`] refuses to start attempt `max_attempts + 1`,
//! so the ceiling holds no matter how the caller drives the loop.
//!
//! ## Backoff
//!
//! `delay(n) = min(max_delay, base_delay · 2^(n-1))` after the n-th failed
//! attempt. With the defaults (3 s base, 30 s cap, 3 attempts) the waits are
//! 3 s then 6 s.

use crate::error::UploadError;
use std::time::Duration;

/// Attempt ceiling and exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Default: 3.
    pub max_attempts: u32,
    /// Delay after the first failure. Default: 3000 ms.
    pub base_delay: Duration,
    /// Upper bound on any single delay. Default: 30000 ms.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(3_000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let base = self.base_delay.as_millis() as u64;
        let delay = base.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay.as_millis() as u64))
    }
}

/// Size-adaptive per-attempt upload timeout.
///
/// `min(ceiling, max(floor, floor + per_mb · (size_mb − free_mb)))`
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UploadTimeoutPolicy {
    /// Default: 30000 ms.
    pub floor: Duration,
    /// Default: 120000 ms.
    pub ceiling: Duration,
    /// Extra time per MB above `free_mb`. Default: 3000 ms.
    pub per_mb: Duration,
    /// Size covered by the floor alone. Default: 5 MB.
    pub free_mb: f64,
}

impl Default for UploadTimeoutPolicy {
    fn default() -> Self {
        Self {
            floor: Duration::from_millis(30_000),
            ceiling: Duration::from_millis(120_000),
            per_mb: Duration::from_millis(3_000),
            free_mb: 5.0,
        }
    }
}

impl UploadTimeoutPolicy {
    pub fn timeout_for(&self, size_mb: f64) -> Duration {
        let floor = self.floor.as_millis() as f64;
        let extra = (size_mb - self.free_mb).max(0.0) * self.per_mb.as_millis() as f64;
        let ms = (floor + extra).max(floor).min(self.ceiling.as_millis() as f64);
        Duration::from_millis(ms as u64)
    }
}

/// Pause between consecutive uploads of one record.
///
/// Grows with the number of uploads already made for the record, which
/// keeps a media-heavy record from hammering the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PacingPolicy {
    /// Pause before the second upload. Default: 500 ms.
    pub base: Duration,
    /// Added per further upload. Default: 250 ms.
    pub step: Duration,
    /// Default: 3000 ms.
    pub max: Duration,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            step: Duration::from_millis(250),
            max: Duration::from_millis(3_000),
        }
    }
}

impl PacingPolicy {
    /// No pacing at all; used by tests and dry runs.
    pub fn none() -> Self {
        Self {
            base: Duration::ZERO,
            step: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Pause before the next upload, given how many this record already made.
    pub fn delay_before(&self, uploads_so_far: usize) -> Duration {
        if uploads_so_far == 0 {
            return Duration::ZERO;
        }
        let steps = u32::try_from(uploads_so_far - 1).unwrap_or(u32::MAX);
        self.base
            .saturating_add(self.step.saturating_mul(steps))
            .min(self.max)
    }
}

/// Where the attempt loop currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptState {
    /// No attempt started yet.
    Idle,
    Attempting { attempt: u32 },
    Waiting { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    /// A non-retryable failure ended the loop early.
    Terminal { attempts: u32 },
    /// Every allowed attempt failed.
    Exhausted { attempts: u32 },
}

impl AttemptState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            AttemptState::Succeeded { .. }
                | AttemptState::Terminal { .. }
                | AttemptState::Exhausted { .. }
        )
    }
}

/// What the caller should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    Retry { delay: Duration },
    GiveUp,
}

/// Attempt counter, last error and delays for one upload.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
    state: AttemptState,
    last_error: Option<UploadError>,
    delays: Vec<Duration>,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            state: AttemptState::Idle,
            last_error: None,
            delays: Vec::new(),
        }
    }

    /// Start the next attempt. Returns its 1-based number, or `None` if the
    /// loop is finished or the ceiling has been reached.
    pub fn begin_attempt(&mut self) -> Option<u32> {
        if self.state.is_finished() || self.attempt >= self.policy.max_attempts {
            return None;
        }
        self.attempt += 1;
        self.state = AttemptState::Attempting {
            attempt: self.attempt,
        };
        Some(self.attempt)
    }

    pub fn succeed(&mut self) {
        self.state = AttemptState::Succeeded {
            attempts: self.attempt,
        };
    }

    /// Record a failed attempt and decide what happens next.
    pub fn fail(&mut self, error: UploadError) -> NextStep {
        let retryable = error.is_retryable();
        self.last_error = Some(error);

        if !retryable {
            self.state = AttemptState::Terminal {
                attempts: self.attempt,
            };
            return NextStep::GiveUp;
        }
        if self.attempt >= self.policy.max_attempts {
            self.state = AttemptState::Exhausted {
                attempts: self.attempt,
            };
            return NextStep::GiveUp;
        }

        let delay = self.policy.backoff_delay(self.attempt);
        self.delays.push(delay);
        self.state = AttemptState::Waiting {
            attempt: self.attempt,
            delay,
        };
        NextStep::Retry { delay }
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn state(&self) -> &AttemptState {
        &self.state
    }

    pub fn last_error(&self) -> Option<&UploadError> {
        self.last_error.as_ref()
    }

    /// Backoff delays handed out so far, in order.
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}
