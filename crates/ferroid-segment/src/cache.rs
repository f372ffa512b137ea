//! Tag registry and its background refresher.
//!
//! The [`TagCache`] maps each business tag to its [`SegmentBuffer`]. It is
//! filled from the store's tag list and kept in sync by a refresher thread:
//! tags that appear in the store get an (uninitialized) buffer, and tags that
//! disappear are evicted.

use core::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, Sender, select};
use parking_lot::RwLock;

use crate::{
    AllocatorConfig, Error, Result, SegmentStore, StoreError,
    buffer::{BufferView, SegmentBuffer, StepTuner},
};

/// Counts from one reconciliation of the cache against the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// Tags newly found in the store.
    pub added: usize,
    /// Tags evicted because the store no longer lists them.
    pub removed: usize,
}

/// Buffers keyed by tag.
pub(crate) struct TagCache {
    buffers: RwLock<HashMap<String, Arc<SegmentBuffer>>>,
    loaded: AtomicBool,
    config: Arc<AllocatorConfig>,
}

impl TagCache {
    pub(crate) fn new(config: Arc<AllocatorConfig>) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            loaded: AtomicBool::new(false),
            config,
        }
    }

    /// `true` once the tag list has been loaded at least once.
    #[inline]
    pub(crate) fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn get(&self, tag: &str) -> Option<Arc<SegmentBuffer>> {
        self.buffers.read().get(tag).cloned()
    }

    pub(crate) fn tuner_for(&self, tag: &str) -> StepTuner {
        StepTuner::new(self.config.step_for(tag), self.config.step_policy)
    }

    /// Inserts `buffer` unless the tag already has one. Returns the buffer
    /// now registered for the tag.
    pub(crate) fn insert_if_absent(&self, buffer: SegmentBuffer) -> Arc<SegmentBuffer> {
        let mut buffers = self.buffers.write();
        Arc::clone(
            buffers
                .entry(buffer.tag().to_string())
                .or_insert_with(|| Arc::new(buffer)),
        )
    }

    /// Reconciles the cache with the store's tag list.
    ///
    /// Existing buffers are kept untouched so in-progress segments survive.
    /// Only buffers cached before the tag list was read can be evicted, so a
    /// tag bootstrapped while the list is in flight is kept. Marks the cache
    /// loaded on success.
    ///
    /// # Errors
    ///
    /// Returns the store error if the tag list cannot be read; the cache is
    /// left as it was.
    pub(crate) fn refresh(&self, store: &dyn SegmentStore) -> Result<RefreshOutcome, StoreError> {
        // Holding the Arcs keeps their addresses from being reused.
        let cached: Vec<Arc<SegmentBuffer>> = self.buffers.read().values().cloned().collect();
        let evictable: HashSet<*const SegmentBuffer> = cached.iter().map(Arc::as_ptr).collect();

        let tags = store.list_tags()?;
        let listed: HashSet<&str> = tags.iter().map(String::as_str).collect();

        let mut outcome = RefreshOutcome::default();
        {
            let mut buffers = self.buffers.write();
            for tag in &tags {
                if !buffers.contains_key(tag.as_str()) {
                    let buffer = SegmentBuffer::new(tag.as_str(), self.tuner_for(tag));
                    buffers.insert(tag.clone(), Arc::new(buffer));
                    outcome.added += 1;
                }
            }

            let before = buffers.len();
            buffers.retain(|tag, buffer| {
                listed.contains(tag.as_str()) || !evictable.contains(&Arc::as_ptr(buffer))
            });
            outcome.removed = before - buffers.len();
        }
        self.loaded.store(true, Ordering::Release);

        #[cfg(feature = "tracing")]
        if outcome != RefreshOutcome::default() {
            tracing::info!(
                added = outcome.added,
                removed = outcome.removed,
                "Tag cache refreshed"
            );
        }
        Ok(outcome)
    }

    /// Cached tags, sorted.
    pub(crate) fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.buffers.read().keys().cloned().collect();
        tags.sort_unstable();
        tags
    }

    /// Snapshots of every buffer, sorted by tag.
    pub(crate) fn views(&self) -> Vec<BufferView> {
        let buffers: Vec<Arc<SegmentBuffer>> = self.buffers.read().values().cloned().collect();
        let mut views: Vec<BufferView> = buffers.iter().map(|b| b.view()).collect();
        views.sort_unstable_by(|a, b| a.tag.cmp(&b.tag));
        views
    }
}

/// Handle to the background refresher thread.
pub(crate) struct Refresher {
    shutdown: Sender<()>,
    wake: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Refresher {
    /// Starts the refresher. The first refresh runs after `initial_delay`,
    /// then every `interval`, and whenever [`Refresher::wake`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] if the thread cannot be started.
    pub(crate) fn spawn(
        cache: Arc<TagCache>,
        store: Arc<dyn SegmentStore>,
        initial_delay: Duration,
        interval: Duration,
    ) -> Result<Self> {
        let (shutdown, shutdown_rx) = crossbeam_channel::bounded(1);
        let (wake, wake_rx) = crossbeam_channel::bounded(1);

        let handle = thread::Builder::new()
            .name("segment-refresher".to_string())
            .spawn(move || {
                refresh_loop(
                    &cache,
                    &*store,
                    initial_delay,
                    interval,
                    &shutdown_rx,
                    &wake_rx,
                );
            })
            .map_err(|source| Error::Spawn {
                context: "tag refresher".to_string(),
                source,
            })?;

        Ok(Self {
            shutdown,
            wake,
            handle: Some(handle),
        })
    }

    /// Requests an out-of-schedule refresh. Requests made while one is
    /// already queued are coalesced.
    pub(crate) fn wake(&self) {
        let _ = self.wake.try_send(());
    }

    /// Stops the thread and waits for it to exit.
    pub(crate) fn stop(&mut self) {
        let _ = self.shutdown.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                #[cfg(feature = "tracing")]
                tracing::error!("Tag refresher panicked");
            }
        }
    }
}

impl Drop for Refresher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn refresh_loop(
    cache: &TagCache,
    store: &dyn SegmentStore,
    initial_delay: Duration,
    interval: Duration,
    shutdown: &Receiver<()>,
    wake: &Receiver<()>,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Tag refresher started");

    let mut timer = crossbeam_channel::after(initial_delay);
    loop {
        select! {
            recv(shutdown) -> _ => break,
            recv(wake) -> msg => {
                if msg.is_err() {
                    break;
                }
                run_refresh(cache, store);
            }
            recv(timer) -> _ => {
                run_refresh(cache, store);
                timer = crossbeam_channel::after(interval);
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Tag refresher stopped");
}

fn run_refresh(cache: &TagCache, store: &dyn SegmentStore) {
    if let Err(_e) = cache.refresh(store) {
        #[cfg(feature = "tracing")]
        tracing::warn!(error = %_e, "Tag refresh failed, keeping cached tags");
    }
}
