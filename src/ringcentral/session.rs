//! Poll session state for a single outbound call.
//!
//! `PollSession` is a plain value: every transition consumes the session and
//! returns the next one together with a `PollDecision`. The poll loop in
//! `poller.rs` is the only caller that threads it through time.

use std::time::Duration;

use serde::Serialize;

use super::{CallPhase, BASE_POLL_INTERVAL_MS, MAX_CONSECUTIVE_ERRORS, MIN_POLL_INTERVAL_MS};
use crate::error::TelephonyError;

/// Rate-limit backoff grows by this factor per 429.
const RATE_LIMIT_FACTOR: u32 = 3;
/// Upper bound on the rate-limit multiplier (8 x 15 s = 2 min).
const MAX_BACKOFF_MULTIPLIER: u32 = 8;
/// Linear slowdown added per consecutive generic error.
const ERROR_STEP: Duration = Duration::from_millis(5_000);

/// Why polling stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "reason", content = "phase")]
pub enum StopReason {
    /// The call reached Success, Failed, Busy or the ended marker.
    Terminal(CallPhase),
    /// The server no longer knows the call; retrying is futile.
    ResourceGone,
    /// `max_consecutive_errors` generic failures in a row.
    TooManyErrors,
    Cancelled,
}

/// Which transition a failed poll takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorTransition {
    RateLimit,
    NotFound,
    Generic,
}

impl ErrorTransition {
    pub fn for_error(err: &TelephonyError) -> Self {
        match err {
            TelephonyError::RateLimited => ErrorTransition::RateLimit,
            TelephonyError::NotFound(_) => ErrorTransition::NotFound,
            _ => ErrorTransition::Generic,
        }
    }
}

/// Clamp a configured base interval to the polling floor.
pub fn clamp_base_interval(base: Duration) -> Duration {
    base.max(Duration::from_millis(MIN_POLL_INTERVAL_MS))
}

/// What the poll loop should do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    /// Poll again after the given delay.
    Continue(Duration),
    Stop(StopReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSession {
    call_id: String,
    phase: CallPhase,
    #[serde(with = "millis")]
    base_interval: Duration,
    #[serde(with = "millis")]
    poll_interval: Duration,
    consecutive_errors: u32,
    backoff_multiplier: u32,
    max_consecutive_errors: u32,
}

impl PollSession {
    /// `base_interval` below one second is raised to one second.
    pub fn new(call_id: impl Into<String>, base_interval: Duration) -> Self {
        let base_interval = clamp_base_interval(base_interval);
        Self {
            call_id: call_id.into(),
            phase: CallPhase::Ringing,
            base_interval,
            poll_interval: base_interval,
            consecutive_errors: 0,
            backoff_multiplier: 1,
            max_consecutive_errors: MAX_CONSECUTIVE_ERRORS,
        }
    }

    pub fn with_max_consecutive_errors(mut self, max: u32) -> Self {
        self.max_consecutive_errors = max.max(1);
        self
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn base_interval(&self) -> Duration {
        self.base_interval
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn backoff_multiplier(&self) -> u32 {
        self.backoff_multiplier
    }

    /// Point the session at `call_id`.
    ///
    /// Backoff state belongs to one in-flight call: a different id starts from
    /// base values, the same id keeps its counters.
    pub fn rearm(self, call_id: &str) -> Self {
        if self.call_id == call_id {
            return self;
        }
        Self::new(call_id, self.base_interval)
            .with_max_consecutive_errors(self.max_consecutive_errors)
    }

    /// A status response arrived.
    pub fn apply_success(mut self, phase: CallPhase) -> (Self, PollDecision) {
        self.phase = phase;
        if phase.is_terminal() {
            return (self, PollDecision::Stop(StopReason::Terminal(phase)));
        }
        self.consecutive_errors = 0;
        self.backoff_multiplier = 1;
        self.poll_interval = self.base_interval;
        let next = self.poll_interval;
        (self, PollDecision::Continue(next))
    }

    /// The route reported a rate limit.
    pub fn apply_rate_limit(mut self) -> (Self, PollDecision) {
        self.backoff_multiplier = self
            .backoff_multiplier
            .saturating_mul(RATE_LIMIT_FACTOR)
            .min(MAX_BACKOFF_MULTIPLIER);
        self.poll_interval = self.base_interval.saturating_mul(self.backoff_multiplier);
        let next = self.poll_interval;
        (self, PollDecision::Continue(next))
    }

    /// Any other failure, including transport errors.
    pub fn apply_generic_error(mut self) -> (Self, PollDecision) {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.poll_interval = self
            .base_interval
            .saturating_add(ERROR_STEP.saturating_mul(self.consecutive_errors));
        if self.consecutive_errors >= self.max_consecutive_errors {
            return (self, PollDecision::Stop(StopReason::TooManyErrors));
        }
        let next = self.poll_interval;
        (self, PollDecision::Continue(next))
    }

    /// The call's server-side resource is gone.
    pub fn apply_not_found(mut self) -> (Self, PollDecision) {
        self.phase = CallPhase::Ended;
        (self, PollDecision::Stop(StopReason::ResourceGone))
    }

    /// Route a classified error to the matching transition.
    pub fn apply_error(self, err: &TelephonyError) -> (Self, PollDecision) {
        match ErrorTransition::for_error(err) {
            ErrorTransition::RateLimit => self.apply_rate_limit(),
            ErrorTransition::NotFound => self.apply_not_found(),
            ErrorTransition::Generic => self.apply_generic_error(),
        }
    }
}

impl Default for PollSession {
    fn default() -> Self {
        Self::new("", Duration::from_millis(BASE_POLL_INTERVAL_MS))
    }
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }
}
