use core::future::Future;

use super::SleepProvider;
use crate::{Allocator, Error, IdStatus, Result, RetryPolicy};

/// Extension trait for awaiting IDs from an [`Allocator`].
///
/// Pending results and retryable errors are waited out with the given
/// [`SleepProvider`] instead of blocking the thread between attempts.
///
/// Each attempt is still a synchronous [`Allocator::generate_id`] call. On the
/// hot path that is a few atomic operations, but bootstrapping a tag or a
/// drained tag waiting on its refill can block the executor thread briefly.
pub trait AllocatorAsyncExt {
    /// Returns a future that resolves to the next ID for `tag`.
    ///
    /// # Errors
    ///
    /// Non-retryable errors are returned at once. After
    /// `policy.max_attempts` attempts the last retryable error is returned,
    /// or [`Error::RetriesExhausted`] if every attempt was pending.
    fn try_next_id_async<S>(
        &self,
        tag: &str,
        policy: RetryPolicy,
    ) -> impl Future<Output = Result<u64>>
    where
        S: SleepProvider;
}

impl AllocatorAsyncExt for Allocator {
    fn try_next_id_async<S>(
        &self,
        tag: &str,
        policy: RetryPolicy,
    ) -> impl Future<Output = Result<u64>>
    where
        S: SleepProvider,
    {
        async move {
            let mut last_err = None;
            for attempt in 0..policy.max_attempts {
                if attempt > 0 {
                    S::sleep_for(policy.backoff).await;
                }
                match self.generate_id(tag) {
                    Ok(IdStatus::Ready { id }) => return Ok(id),
                    Ok(IdStatus::Pending { .. }) => {}
                    Err(e) if e.is_retryable() => last_err = Some(e),
                    Err(e) => return Err(e),
                }
            }
            Err(last_err.unwrap_or_else(|| Error::RetriesExhausted {
                tag: tag.to_string(),
                attempts: policy.max_attempts,
            }))
        }
    }
}
