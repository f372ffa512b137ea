use core::{future::Future, pin::Pin};

use crate::{Allocator, Result, RetryPolicy, futures::SleepProvider};

/// An implementation of [`SleepProvider`] using Tokio's timer.
///
/// This is the default provider for use in async applications built on Tokio.
pub struct TokioSleep;
impl SleepProvider for TokioSleep {
    type Sleep = tokio::time::Sleep;

    fn sleep_for(dur: core::time::Duration) -> Self::Sleep {
        tokio::time::sleep(dur)
    }
}

/// An implementation of [`SleepProvider`] using Tokio's yield.
///
/// Retries immediately after giving other tasks a turn. Useful when the
/// expected wait is a refill landing within microseconds; under load a timed
/// backoff ([`TokioSleep`]) burns less CPU.
pub struct TokioYield;
impl SleepProvider for TokioYield {
    /// Tokio's `yield_now()` returns a private future type, so we must use a
    /// boxed `dyn Future` to abstract over it.
    type Sleep = Pin<Box<dyn Future<Output = ()> + Send>>;

    fn sleep_for(_dur: core::time::Duration) -> Self::Sleep {
        Box::pin(tokio::task::yield_now())
    }
}

/// Extension trait for awaiting IDs using the
/// [`tokio`](https://docs.rs/tokio) async runtime.
///
/// This trait provides a convenience method backed by [`TokioSleep`], so
/// `.try_next_id_async(tag, policy)` works without naming a sleep strategy.
pub trait AllocatorAsyncTokioExt {
    /// Returns a future that resolves to the next ID for `tag`.
    ///
    /// Internally delegates to [`AllocatorAsyncExt::try_next_id_async`] with
    /// [`TokioSleep`] as the sleep strategy.
    ///
    /// # Errors
    ///
    /// See [`AllocatorAsyncExt::try_next_id_async`].
    ///
    /// [`AllocatorAsyncExt::try_next_id_async`]:
    ///     crate::AllocatorAsyncExt::try_next_id_async
    fn try_next_id_async(
        &self,
        tag: &str,
        policy: RetryPolicy,
    ) -> impl Future<Output = Result<u64>>;
}

impl AllocatorAsyncTokioExt for Allocator {
    fn try_next_id_async(
        &self,
        tag: &str,
        policy: RetryPolicy,
    ) -> impl Future<Output = Result<u64>> {
        <Self as crate::AllocatorAsyncExt>::try_next_id_async::<TokioSleep>(self, tag, policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AllocatorAsyncExt, AllocatorConfig, Error, MemoryStore, PendingReason};
    use core::time::Duration;
    use std::collections::HashSet;

    const TASKS: usize = 8;
    const IDS_PER_TASK: usize = 4096;

    fn allocator() -> Allocator {
        Allocator::builder(MemoryStore::new())
            .config(AllocatorConfig {
                default_step: 256,
                ..AllocatorConfig::default()
            })
            .background_refresh(false)
            .build()
            .unwrap()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(10_000, Duration::from_millis(1))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn generates_many_unique_ids_sleep() -> Result<()> {
        many_unique_ids::<TokioSleep>().await
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn generates_many_unique_ids_yield() -> Result<()> {
        many_unique_ids::<TokioYield>().await
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn generates_many_unique_ids_convenience() -> Result<()> {
        let allocator = allocator();
        let tasks: Vec<tokio::task::JoinHandle<Result<Vec<u64>>>> = (0..TASKS)
            .map(|_| {
                let allocator = allocator.clone();
                tokio::spawn(async move {
                    let mut ids = Vec::with_capacity(IDS_PER_TASK);
                    for _ in 0..IDS_PER_TASK {
                        let id = AllocatorAsyncTokioExt::try_next_id_async(
                            &allocator, "tokio", policy(),
                        )
                        .await?;
                        ids.push(id);
                    }
                    Ok(ids)
                })
            })
            .collect();

        assert_unique(tasks).await
    }

    #[tokio::test]
    async fn pending_resolves_after_bootstrap() -> Result<()> {
        let allocator = allocator();
        assert_eq!(
            allocator.generate_id("fresh")?,
            crate::IdStatus::Pending {
                reason: PendingReason::NewTag
            }
        );
        let id = AllocatorAsyncTokioExt::try_next_id_async(&allocator, "fresh", policy()).await?;
        assert_eq!(id, 0);
        Ok(())
    }

    #[tokio::test]
    async fn non_retryable_errors_return_immediately() {
        let allocator = allocator();
        let err = AllocatorAsyncTokioExt::try_next_id_async(&allocator, "", policy())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTag { .. }));
    }

    async fn many_unique_ids<S: SleepProvider + 'static>() -> Result<()> {
        let allocator = allocator();
        let tasks: Vec<tokio::task::JoinHandle<Result<Vec<u64>>>> = (0..TASKS)
            .map(|_| {
                let allocator = allocator.clone();
                tokio::spawn(async move {
                    let mut ids = Vec::with_capacity(IDS_PER_TASK);
                    for _ in 0..IDS_PER_TASK {
                        let id = AllocatorAsyncExt::try_next_id_async::<S>(
                            &allocator, "explicit", policy(),
                        )
                        .await?;
                        ids.push(id);
                    }
                    Ok(ids)
                })
            })
            .collect();

        assert_unique(tasks).await
    }

    async fn assert_unique(tasks: Vec<tokio::task::JoinHandle<Result<Vec<u64>>>>) -> Result<()> {
        let mut seen = HashSet::with_capacity(TASKS * IDS_PER_TASK);
        for task in tasks {
            let ids = task.await.expect("task panicked")?;
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            for id in ids {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), TASKS * IDS_PER_TASK);
        Ok(())
    }
}
