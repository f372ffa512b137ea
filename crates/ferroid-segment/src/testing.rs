//! Test doubles shared by the unit tests.

use core::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::{MemoryStore, SegmentStore, StoreError};

/// A [`MemoryStore`] that counts calls and can be told to fail or stall.
#[derive(Debug, Default)]
pub(crate) struct FlakyStore {
    inner: MemoryStore,
    bumps: AtomicUsize,
    lists: AtomicUsize,
    fail_bumps: AtomicBool,
    fail_lists: AtomicBool,
    paused: Mutex<bool>,
    resumed: Condvar,
    lists_paused: Mutex<bool>,
    lists_resumed: Condvar,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_tag(mut self, tag: &str, max_id: u64, step: u64) -> Self {
        self.inner = self.inner.with_tag(tag, max_id, step);
        self
    }

    pub(crate) fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Bump calls seen so far, failed and stalled ones included.
    pub(crate) fn bumps(&self) -> usize {
        self.bumps.load(Ordering::SeqCst)
    }

    pub(crate) fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_bumps(&self, fail: bool) {
        self.fail_bumps.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent bumps block until [`FlakyStore::resume`].
    pub(crate) fn pause(&self) {
        *self.paused.lock() = true;
    }

    pub(crate) fn resume(&self) {
        *self.paused.lock() = false;
        self.resumed.notify_all();
    }

    /// Makes subsequent tag listings block after reading the list, until
    /// [`FlakyStore::resume_lists`].
    pub(crate) fn pause_lists(&self) {
        *self.lists_paused.lock() = true;
    }

    pub(crate) fn resume_lists(&self) {
        *self.lists_paused.lock() = false;
        self.lists_resumed.notify_all();
    }

    fn unavailable(what: &str) -> StoreError {
        StoreError::Unavailable {
            context: format!("{what} disabled by test"),
        }
    }
}

impl SegmentStore for FlakyStore {
    fn bump_max_id(&self, tag: &str, step: u64) -> Result<u64, StoreError> {
        self.bumps.fetch_add(1, Ordering::SeqCst);
        {
            let mut paused = self.paused.lock();
            while *paused {
                self.resumed.wait(&mut paused);
            }
        }
        if self.fail_bumps.load(Ordering::SeqCst) {
            return Err(Self::unavailable("bump"));
        }
        self.inner.bump_max_id(tag, step)
    }

    fn max_id(&self, tag: &str) -> Result<Option<u64>, StoreError> {
        self.inner.max_id(tag)
    }

    fn list_tags(&self) -> Result<Vec<String>, StoreError> {
        if self.fail_lists.load(Ordering::SeqCst) {
            self.lists.fetch_add(1, Ordering::SeqCst);
            return Err(Self::unavailable("list"));
        }
        let tags = self.inner.list_tags()?;
        self.lists.fetch_add(1, Ordering::SeqCst);

        let mut paused = self.lists_paused.lock();
        while *paused {
            self.lists_resumed.wait(&mut paused);
        }
        Ok(tags)
    }
}

/// Polls `condition` until it holds, panicking after five seconds.
pub(crate) fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}
