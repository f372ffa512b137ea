use core::time::Duration;
use std::collections::HashMap;

use crate::{Error, Result};

/// Range size used for tags without an override.
pub const DEFAULT_STEP: u64 = 1000;

/// Upper bound for adaptive step growth.
pub const DEFAULT_MAX_STEP: u64 = 1_000_000;

/// How the allocator sizes each bump against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPolicy {
    /// Always bump by the tag's base step.
    Fixed,
    /// Grow or shrink the step with the tag's consumption rate.
    ///
    /// When a refill follows the previous bump within `segment_ttl`, the step
    /// doubles (capped at `max_step`). When more than twice `segment_ttl` has
    /// passed, it halves (never below the base step).
    Adaptive {
        /// Target lifetime of one segment.
        segment_ttl: Duration,
        /// Largest step the policy may reach.
        max_step: u64,
    },
}

impl StepPolicy {
    /// Adaptive sizing aiming at fifteen-minute segments.
    pub const fn adaptive() -> Self {
        Self::Adaptive {
            segment_ttl: Duration::from_secs(15 * 60),
            max_step: DEFAULT_MAX_STEP,
        }
    }
}

/// Runtime configuration for an [`Allocator`].
///
/// Every field has a production default; construct with
/// `AllocatorConfig::default()` and override what you need, then hand it to
/// [`AllocatorBuilder::config`].
///
/// [`Allocator`]: crate::Allocator
/// [`AllocatorBuilder::config`]: crate::AllocatorBuilder::config
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Range size for tags without an entry in `step_overrides`.
    pub default_step: u64,

    /// Per-tag range sizes.
    pub step_overrides: HashMap<String, u64>,

    /// Fixed or adaptive range sizing.
    pub step_policy: StepPolicy,

    /// Remaining fraction of the current segment below which the next
    /// segment is refilled in the background.
    pub refill_threshold: f64,

    /// Refill threads kept alive at all times.
    pub core_workers: usize,

    /// Upper bound on refill threads, including `core_workers`.
    pub max_workers: usize,

    /// How long an extra refill thread idles before exiting.
    pub keep_alive: Duration,

    /// How long shutdown waits for each refill thread to acknowledge.
    pub shutdown_timeout: Duration,

    /// Delay before the first background tag refresh.
    pub refresh_initial_delay: Duration,

    /// Interval between background tag refreshes.
    pub refresh_interval: Duration,

    /// Spin iterations the slow path spends waiting on an in-flight refill.
    pub spin_limit: u32,

    /// Sleep taken once by the slow path if the refill is still in flight
    /// after spinning.
    pub wait_interval: Duration,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            default_step: DEFAULT_STEP,
            step_overrides: HashMap::new(),
            step_policy: StepPolicy::Fixed,
            refill_threshold: 0.1,
            core_workers: 2,
            max_workers: 8,
            keep_alive: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(3),
            refresh_initial_delay: Duration::from_secs(60),
            refresh_interval: Duration::from_secs(60),
            spin_limit: 10_000,
            wait_interval: Duration::from_millis(10),
        }
    }
}

impl AllocatorConfig {
    /// The base step for `tag`.
    pub fn step_for(&self, tag: &str) -> u64 {
        self.step_overrides
            .get(tag)
            .copied()
            .unwrap_or(self.default_step)
    }

    /// Checks the configuration for values the allocator cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.default_step == 0 {
            return Err(invalid("default_step must be greater than 0"));
        }
        if let Some((tag, _)) = self.step_overrides.iter().find(|(_, step)| **step == 0) {
            return Err(invalid(format!("step override for '{tag}' must be greater than 0")));
        }
        if !(self.refill_threshold > 0.0 && self.refill_threshold < 1.0) {
            return Err(invalid(format!(
                "refill_threshold ({}) must be within (0, 1)",
                self.refill_threshold
            )));
        }
        if self.core_workers == 0 {
            return Err(invalid("core_workers must be greater than 0"));
        }
        if self.max_workers < self.core_workers {
            return Err(invalid(format!(
                "max_workers ({}) must be at least core_workers ({})",
                self.max_workers, self.core_workers
            )));
        }
        if self.keep_alive.is_zero() {
            return Err(invalid("keep_alive must be non-zero"));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(invalid("shutdown_timeout must be non-zero"));
        }
        if self.refresh_interval.is_zero() {
            return Err(invalid("refresh_interval must be non-zero"));
        }
        if self.wait_interval.is_zero() {
            return Err(invalid("wait_interval must be non-zero"));
        }
        if let StepPolicy::Adaptive {
            segment_ttl,
            max_step,
        } = self.step_policy
        {
            if segment_ttl.is_zero() {
                return Err(invalid("adaptive segment_ttl must be non-zero"));
            }
            let largest_base = self
                .step_overrides
                .values()
                .copied()
                .chain(core::iter::once(self.default_step))
                .max()
                .unwrap_or(self.default_step);
            if max_step < largest_base {
                return Err(invalid(format!(
                    "adaptive max_step ({max_step}) is below a base step ({largest_base})"
                )));
            }
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::InvalidConfig {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        AllocatorConfig::default().validate().unwrap();
    }

    #[test]
    fn step_for_prefers_override() {
        let mut config = AllocatorConfig::default();
        config.step_overrides.insert("orders".to_string(), 5000);

        assert_eq!(config.step_for("orders"), 5000);
        assert_eq!(config.step_for("users"), DEFAULT_STEP);
    }

    #[test]
    fn rejects_bad_values() {
        let cases: [fn(&mut AllocatorConfig); 9] = [
            |c| c.default_step = 0,
            |c| c.refill_threshold = 1.0,
            |c| c.refill_threshold = 0.0,
            |c| c.core_workers = 0,
            |c| c.max_workers = 1,
            |c| c.refresh_interval = Duration::ZERO,
            |c| c.keep_alive = Duration::ZERO,
            |c| c.shutdown_timeout = Duration::ZERO,
            |c| c.wait_interval = Duration::ZERO,
        ];

        for mutate in cases {
            let mut config = AllocatorConfig::default();
            mutate(&mut config);
            assert!(matches!(
                config.validate(),
                Err(Error::InvalidConfig { .. })
            ));
        }
    }

    #[test]
    fn rejects_adaptive_cap_below_base() {
        let config = AllocatorConfig {
            default_step: 10_000,
            step_policy: StepPolicy::Adaptive {
                segment_ttl: Duration::from_secs(60),
                max_step: 5_000,
            },
            ..AllocatorConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
