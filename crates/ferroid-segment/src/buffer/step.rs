use std::time::Instant;

use crate::config::StepPolicy;

/// Chooses the step for each bump of one tag.
///
/// Only the initializing caller and the (single) in-flight refill touch the
/// tuner, so it lives behind a plain mutex next to the buffer state.
#[derive(Debug, Clone)]
pub(crate) struct StepTuner {
    base: u64,
    step: u64,
    policy: StepPolicy,
    last_bump: Option<Instant>,
}

impl StepTuner {
    pub(crate) const fn new(base: u64, policy: StepPolicy) -> Self {
        Self {
            base,
            step: base,
            policy,
            last_bump: None,
        }
    }

    /// The step used by the most recent bump, or the base step before any.
    pub(crate) const fn current(&self) -> u64 {
        self.step
    }

    /// The step the next bump should use if it happens at `now`.
    pub(crate) fn next_step(&self, now: Instant) -> u64 {
        let StepPolicy::Adaptive {
            segment_ttl,
            max_step,
        } = self.policy
        else {
            return self.base;
        };
        let Some(last_bump) = self.last_bump else {
            return self.step;
        };

        let elapsed = now.saturating_duration_since(last_bump);
        if elapsed < segment_ttl {
            self.step.saturating_mul(2).min(max_step).max(self.step)
        } else if elapsed < segment_ttl.saturating_mul(2) {
            self.step
        } else {
            (self.step / 2).max(self.base)
        }
    }

    /// Records a successful bump of `step` at `now`.
    pub(crate) fn record(&mut self, step: u64, now: Instant) {
        self.step = step;
        self.last_bump = Some(now);
    }
}
