//! Per-tag double buffer.
//!
//! A [`SegmentBuffer`] owns two [`Segment`]s. One serves IDs (the *current*
//! segment) while the other is refilled in the background once the current
//! one runs low. When the current segment is drained, the first caller to
//! take the write lock switches to the prepared one.
//!
//! ## Locking
//!
//! - The hot path takes the state lock shared and claims an ID with one
//!   `fetch_add` on the current segment's cursor.
//! - Installing a refilled range and switching segments take the lock
//!   exclusively.
//! - At most one refill per buffer is in flight, guarded by
//!   `refill_in_flight`. It is cleared on every refill exit, including
//!   failures and panics.
//! - Store I/O never happens under the state lock.

mod step;

pub(crate) use step::StepTuner;

use core::{
    hint::spin_loop,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use std::{sync::Arc, thread, time::Instant};

use parking_lot::{Mutex, RwLock};
use portable_atomic::AtomicU64;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    AllocatorConfig, Error, Result, SegmentStore, SegmentView, refill::RefillScheduler,
    segment::Segment,
};

/// Knobs for the allocation path, copied out of [`AllocatorConfig`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Tuning {
    pub(crate) refill_threshold: f64,
    pub(crate) spin_limit: u32,
    pub(crate) wait_interval: Duration,
}

impl From<&AllocatorConfig> for Tuning {
    fn from(config: &AllocatorConfig) -> Self {
        Self {
            refill_threshold: config.refill_threshold,
            spin_limit: config.spin_limit,
            wait_interval: config.wait_interval,
        }
    }
}

#[derive(Debug)]
struct BufferState {
    segments: [Segment; 2],
    current: usize,
    next_ready: bool,
}

impl BufferState {
    fn empty() -> Self {
        Self {
            segments: [Segment::empty(), Segment::empty()],
            current: 0,
            next_ready: false,
        }
    }

    #[inline]
    fn current(&self) -> &Segment {
        &self.segments[self.current]
    }
}

/// Double-buffered ID ranges for one business tag.
#[derive(Debug)]
pub(crate) struct SegmentBuffer {
    tag: String,
    state: RwLock<BufferState>,
    refill_in_flight: AtomicBool,
    initialized: AtomicBool,
    // Also serializes first-use initialization.
    tuner: Mutex<StepTuner>,
    // Mirror of the tuner's step, readable while a bump is in flight.
    step: AtomicU64,
}

/// A point-in-time copy of one tag's buffer state, for monitoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferView {
    /// The business tag.
    pub tag: String,
    /// Both segments, indexed as in the buffer.
    pub segments: [SegmentView; 2],
    /// Index of the segment serving IDs.
    pub current_index: usize,
    /// Whether the other segment holds a prepared range.
    pub next_ready: bool,
    /// Whether a background refill is running.
    pub refill_in_flight: bool,
    /// Whether the first range has been fetched.
    pub initialized: bool,
    /// Step of the most recent bump (or the base step before the first).
    pub step: u64,
}

impl SegmentBuffer {
    /// Creates an uninitialized buffer. The first allocation fetches its
    /// range from the store.
    pub(crate) fn new(tag: impl Into<String>, tuner: StepTuner) -> Self {
        Self {
            tag: tag.into(),
            state: RwLock::new(BufferState::empty()),
            refill_in_flight: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            step: AtomicU64::new(tuner.current()),
            tuner: Mutex::new(tuner),
        }
    }

    /// Creates a buffer whose current segment already holds
    /// `[max_id - step, max_id)`.
    pub(crate) fn with_range(
        tag: impl Into<String>,
        mut tuner: StepTuner,
        max_id: u64,
        step: u64,
    ) -> Self {
        tuner.record(step, Instant::now());
        let mut state = BufferState::empty();
        state.segments[0].install(max_id, step);
        Self {
            tag: tag.into(),
            state: RwLock::new(state),
            refill_in_flight: AtomicBool::new(false),
            initialized: AtomicBool::new(true),
            step: AtomicU64::new(step),
            tuner: Mutex::new(tuner),
        }
    }

    pub(crate) fn tag(&self) -> &str {
        &self.tag
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Fetches the first range from the store unless another caller already
    /// did. Concurrent first callers block until the winner is done.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the bump fails. The buffer stays
    /// uninitialized, so the next caller tries again.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self, store), fields(tag = %self.tag)))]
    pub(crate) fn ensure_initialized(&self, store: &dyn SegmentStore) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }

        let mut tuner = self.tuner.lock();
        if self.is_initialized() {
            return Ok(());
        }

        let now = Instant::now();
        let step = tuner.next_step(now);
        let max_id = store.bump_max_id(&self.tag, step)?;
        tuner.record(step, now);
        self.step.store(step, Ordering::Release);
        drop(tuner);

        self.state.write().segments[0].install(max_id, step);
        self.initialized.store(true, Ordering::Release);

        #[cfg(feature = "tracing")]
        tracing::debug!(max_id, step, "Initialized segment buffer");
        Ok(())
    }

    /// Claims one ID from the current segment, scheduling a background refill
    /// of the other segment when the current one runs low.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SegmentsExhausted`] if both segments are drained and
    /// no refill landed within the wait budget.
    pub(crate) fn allocate(
        self: &Arc<Self>,
        refill: &RefillScheduler,
        tuning: &Tuning,
    ) -> Result<u64> {
        {
            let state = self.state.read();
            let current = state.current();
            if !state.next_ready
                && current.remaining_fraction() < tuning.refill_threshold
                && self.begin_refill()
            {
                self.schedule_refill(refill);
            }
            if let Some(id) = current.try_next() {
                return Ok(id);
            }
        }

        self.allocate_slow(tuning)
    }

    #[cold]
    #[inline(never)]
    fn allocate_slow(&self, tuning: &Tuning) -> Result<u64> {
        self.wait_for_refill(tuning);

        let mut state = self.state.write();
        if let Some(id) = state.current().try_next() {
            return Ok(id);
        }
        if state.next_ready {
            state.current ^= 1;
            state.next_ready = false;

            #[cfg(feature = "tracing")]
            tracing::trace!(tag = %self.tag, current = state.current, "Switched segment");

            if let Some(id) = state.current().try_next() {
                return Ok(id);
            }
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(tag = %self.tag, "Both segments exhausted");
        Err(Error::SegmentsExhausted {
            tag: self.tag.clone(),
        })
    }

    /// Bounded spin while a refill is in flight, then a single sleep.
    fn wait_for_refill(&self, tuning: &Tuning) {
        let mut spins = 0;
        while self.refill_in_flight.load(Ordering::Acquire) {
            if spins >= tuning.spin_limit {
                thread::sleep(tuning.wait_interval);
                break;
            }
            spins += 1;
            spin_loop();
        }
    }

    /// Claims the single refill slot. Returns `false` if a refill is already
    /// running.
    fn begin_refill(&self) -> bool {
        self.refill_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    fn schedule_refill(self: &Arc<Self>, refill: &RefillScheduler) {
        if let Err(_e) = refill.submit(Arc::clone(self)) {
            self.refill_in_flight.store(false, Ordering::Release);

            #[cfg(feature = "tracing")]
            tracing::warn!(tag = %self.tag, error = %_e, "Refill not scheduled");
        }
    }

    /// Fetches the next range and installs it into the idle segment.
    ///
    /// Runs on a refill worker. Failures are logged; the in-flight flag is
    /// cleared either way so a later caller can trigger another attempt.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self, store), fields(tag = %self.tag)))]
    pub(crate) fn refill(&self, store: &dyn SegmentStore) {
        let _release = RefillGuard {
            flag: &self.refill_in_flight,
        };

        // Only one refill runs per buffer, so the tuner cannot move while the
        // lock is released for the bump.
        let now = Instant::now();
        let step = self.tuner.lock().next_step(now);
        let max_id = match store.bump_max_id(&self.tag, step) {
            Ok(max_id) => max_id,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_e, step, "Refill failed");
                return;
            }
        };
        self.tuner.lock().record(step, now);
        self.step.store(step, Ordering::Release);

        let mut state = self.state.write();
        debug_assert!(!state.next_ready, "refill raced another refill");
        let next = state.current ^ 1;
        state.segments[next].install(max_id, step);
        state.next_ready = true;

        #[cfg(feature = "tracing")]
        tracing::debug!(max_id, step, segment = next, "Installed refilled segment");
    }

    pub(crate) fn view(&self) -> BufferView {
        let step = self.step.load(Ordering::Acquire);
        let state = self.state.read();
        BufferView {
            tag: self.tag.clone(),
            segments: [state.segments[0].view(), state.segments[1].view()],
            current_index: state.current,
            next_ready: state.next_ready,
            refill_in_flight: self.refill_in_flight.load(Ordering::Acquire),
            initialized: self.is_initialized(),
            step,
        }
    }
}

/// Clears the in-flight flag on every exit path, panics included.
struct RefillGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RefillGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
