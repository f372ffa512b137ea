use core::time::Duration;

/// How the retrying helpers wait out pending or transient results.
///
/// Used by [`Allocator::next_id_blocking`] and the async extensions.
///
/// [`Allocator::next_id_blocking`]: crate::Allocator::next_id_blocking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls to [`Allocator::generate_id`] before giving up.
    ///
    /// [`Allocator::generate_id`]: crate::Allocator::generate_id
    pub max_attempts: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    /// Up to 100 attempts, 10 ms apart.
    fn default() -> Self {
        Self::new(100, Duration::from_millis(10))
    }
}
