mod retry;

pub use retry::RetryPolicy;

use core::sync::atomic::{AtomicBool, Ordering};
use std::{sync::Arc, thread};

use parking_lot::Mutex;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    AllocatorConfig, BufferView, Error, IdStatus, PendingReason, RefreshOutcome, Result,
    SegmentStore,
    buffer::{SegmentBuffer, Tuning},
    cache::{Refresher, TagCache},
    refill::RefillScheduler,
};

/// A segment-based ID allocator serving unique, per-tag increasing 64-bit IDs.
///
/// Each business tag owns a double buffer of ID ranges drawn from a shared
/// [`SegmentStore`]. IDs are handed out from memory; the store is only
/// touched once per range, and the next range is fetched in the background
/// before the current one runs out.
///
/// Cloning is cheap and every clone shares the same buffers, refill pool and
/// refresher.
///
/// ## Features
///
/// - ✅ Thread-safe, lock-light hot path
/// - ✅ IDs unique across every allocator sharing the store
/// - ✅ Strictly increasing per tag within one allocator
/// - ✅ New tags are bootstrapped on first use
///
/// ## Caveats
///
/// - IDs are not contiguous: ranges left unused at shutdown are lost.
/// - Allocators sharing a store interleave ranges, so IDs are not globally
///   ordered across processes.
///
/// # Example
///
/// ```
/// use ferroid_segment::{Allocator, IdStatus, MemoryStore, RetryPolicy};
///
/// let store = MemoryStore::new().with_tag("orders", 0, 1000);
/// let allocator = Allocator::builder(store).build().unwrap();
///
/// assert_eq!(
///     allocator.generate_id("orders").unwrap(),
///     IdStatus::Ready { id: 0 }
/// );
/// assert_eq!(
///     allocator.next_id_blocking("orders", RetryPolicy::default()).unwrap(),
///     1
/// );
/// ```
#[derive(Clone)]
pub struct Allocator {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<AllocatorConfig>,
    tuning: Tuning,
    store: Arc<dyn SegmentStore>,
    cache: Arc<TagCache>,
    refill: RefillScheduler,
    refresher: Mutex<Option<Refresher>>,
    shut_down: AtomicBool,
}

/// Builder for [`Allocator`].
pub struct AllocatorBuilder {
    store: Arc<dyn SegmentStore>,
    config: AllocatorConfig,
    background_refresh: bool,
}

impl AllocatorBuilder {
    /// Replaces the default configuration.
    #[must_use]
    pub fn config(mut self, config: AllocatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Enables or disables the background tag refresher (enabled by
    /// default). Without it the tag list is only reloaded through
    /// [`Allocator::refresh`].
    #[must_use]
    pub fn background_refresh(mut self, enabled: bool) -> Self {
        self.background_refresh = enabled;
        self
    }

    /// Validates the configuration, starts the refill pool, loads the tag
    /// list once and starts the refresher.
    ///
    /// A failed initial tag load is not fatal: the allocator answers
    /// [`PendingReason::CacheLoading`] until a later refresh succeeds.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if the configuration fails validation.
    /// - [`Error::Spawn`] if a background thread cannot be started.
    pub fn build(self) -> Result<Allocator> {
        self.config.validate()?;
        let config = Arc::new(self.config);
        let store = self.store;

        let cache = Arc::new(TagCache::new(Arc::clone(&config)));
        let refill = RefillScheduler::new(Arc::clone(&store), &config)?;

        match cache.refresh(&*store) {
            Ok(_outcome) => {
                #[cfg(feature = "tracing")]
                tracing::info!(tags = _outcome.added, "Loaded tag list");
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_e, "Initial tag load failed, serving pending until a refresh succeeds");
            }
        }

        let refresher = if self.background_refresh {
            Some(Refresher::spawn(
                Arc::clone(&cache),
                Arc::clone(&store),
                config.refresh_initial_delay,
                config.refresh_interval,
            )?)
        } else {
            None
        };

        Ok(Allocator {
            inner: Arc::new(Inner {
                tuning: Tuning::from(&*config),
                config,
                store,
                cache,
                refill,
                refresher: Mutex::new(refresher),
                shut_down: AtomicBool::new(false),
            }),
        })
    }
}

impl Allocator {
    /// Starts building an allocator over `store`.
    ///
    /// Pass an `Arc` of the store to keep a handle to it.
    pub fn builder(store: impl SegmentStore + 'static) -> AllocatorBuilder {
        AllocatorBuilder {
            store: Arc::new(store),
            config: AllocatorConfig::default(),
            background_refresh: true,
        }
    }

    /// Builds an allocator over `store` with the default configuration.
    ///
    /// # Errors
    ///
    /// See [`AllocatorBuilder::build`].
    pub fn new(store: impl SegmentStore + 'static) -> Result<Self> {
        Self::builder(store).build()
    }

    /// Issues the next ID for `tag`.
    ///
    /// # Returns
    /// - `Ok(IdStatus::Ready { id })`: a unique ID, possibly `0`
    /// - `Ok(IdStatus::Pending { reason: CacheLoading })`: the tag list has
    ///   not been loaded yet
    /// - `Ok(IdStatus::Pending { reason: NewTag })`: `tag` was unknown and
    ///   has just been created in the store; the next call is served
    /// - `Err(e)`: see [`Error`]; [`Error::is_retryable`] tells transient
    ///   failures apart
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidTag`] for an empty tag.
    /// - [`Error::Store`] if bootstrapping or first use of the tag fails.
    /// - [`Error::SegmentsExhausted`] if both segments are drained and the
    ///   refill has not landed.
    /// - [`Error::ShutDown`] after [`Allocator::shutdown`].
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn generate_id(&self, tag: &str) -> Result<IdStatus> {
        let inner = &*self.inner;
        if inner.shut_down.load(Ordering::Acquire) {
            return Err(Error::ShutDown);
        }
        if tag.is_empty() {
            return Err(Error::InvalidTag {
                reason: "tag must not be empty".to_string(),
            });
        }
        if !inner.cache.is_loaded() {
            return Ok(IdStatus::Pending {
                reason: PendingReason::CacheLoading,
            });
        }

        let Some(buffer) = inner.cache.get(tag) else {
            return self.bootstrap(tag);
        };
        buffer.ensure_initialized(&*inner.store)?;
        let id = buffer.allocate(&inner.refill, &inner.tuning)?;
        Ok(IdStatus::Ready { id })
    }

    /// Creates the store row for an unknown tag and caches a buffer holding
    /// the range that creation granted.
    #[cold]
    fn bootstrap(&self, tag: &str) -> Result<IdStatus> {
        let inner = &*self.inner;
        let step = inner.config.step_for(tag);
        let max_id = inner.store.bump_max_id(tag, step)?;

        let buffer = SegmentBuffer::with_range(tag, inner.cache.tuner_for(tag), max_id, step);
        inner.cache.insert_if_absent(buffer);
        self.request_refresh();

        #[cfg(feature = "tracing")]
        tracing::info!(tag, max_id, step, "Bootstrapped new tag");
        Ok(IdStatus::Pending {
            reason: PendingReason::NewTag,
        })
    }

    /// Calls [`Allocator::generate_id`] until it yields an ID, sleeping
    /// `policy.backoff` between attempts.
    ///
    /// Pending results and retryable errors are retried; other errors are
    /// returned at once.
    ///
    /// # Errors
    ///
    /// Returns the last retryable error, or [`Error::RetriesExhausted`] if
    /// every attempt was pending.
    pub fn next_id_blocking(&self, tag: &str, policy: RetryPolicy) -> Result<u64> {
        let mut last_err = None;
        for attempt in 0..policy.max_attempts {
            if attempt > 0 {
                thread::sleep(policy.backoff);
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

    /// Reloads the tag list from the store now, adding buffers for new tags
    /// and evicting tags the store no longer lists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the tag list cannot be read, or
    /// [`Error::ShutDown`] after [`Allocator::shutdown`].
    pub fn refresh(&self) -> Result<RefreshOutcome> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(Error::ShutDown);
        }
        Ok(self.inner.cache.refresh(&*self.inner.store)?)
    }

    /// `true` once the tag list has been loaded.
    pub fn is_loaded(&self) -> bool {
        self.inner.cache.is_loaded()
    }

    /// Cached tags, sorted.
    pub fn tags(&self) -> Vec<String> {
        self.inner.cache.tags()
    }

    /// Snapshots of every cached tag's buffer, sorted by tag.
    pub fn buffer_views(&self) -> Vec<BufferView> {
        self.inner.cache.views()
    }

    /// The configuration the allocator was built with.
    pub fn config(&self) -> &AllocatorConfig {
        &self.inner.config
    }

    /// Stops the refresher and the refill pool. Later calls to
    /// [`Allocator::generate_id`] fail with [`Error::ShutDown`].
    ///
    /// Idempotent, and also run when the last clone is dropped.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    fn request_refresh(&self) {
        if let Some(refresher) = self.inner.refresher.lock().as_ref() {
            refresher.wake();
        }
    }
}

impl Inner {
    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Shutting down allocator");

        if let Some(mut refresher) = self.refresher.lock().take() {
            refresher.stop();
        }
        self.refill.shutdown();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl core::fmt::Debug for Allocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Allocator")
            .field("tags", &self.inner.cache.tags().len())
            .field("loaded", &self.inner.cache.is_loaded())
            .field("shut_down", &self.inner.shut_down.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
