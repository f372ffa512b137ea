use portable_atomic::{AtomicU64, Ordering};

/// One contiguous range of IDs, `[max_id - step, max_id)`, drawn from the
/// store in a single bump.
///
/// The cursor is the only part touched on the hot path: readers holding a
/// shared reference advance it with a single `fetch_add`. The range bounds
/// only change through [`Segment::install`], which needs exclusive access and
/// therefore the owning buffer's write lock.
///
/// ## Features
/// - ✅ Lock-free reads
/// - ✅ Never hands out an ID past `max_id`
///
/// ## Caveats
/// Exhausted reads still advance the cursor. The overshoot is bounded by the
/// number of concurrent readers and is discarded by [`Segment::try_next`].
#[derive(Debug)]
pub(crate) struct Segment {
    #[cfg(feature = "cache-padded")]
    cursor: crossbeam_utils::CachePadded<AtomicU64>,
    #[cfg(not(feature = "cache-padded"))]
    cursor: AtomicU64,
    max_id: u64,
    step: u64,
}

/// A point-in-time copy of one segment's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentView {
    /// Next ID the segment would hand out.
    pub cursor: u64,
    /// Exclusive upper bound of the range.
    pub max_id: u64,
    /// Size of the range.
    pub step: u64,
}

impl Segment {
    /// Creates an empty segment. It is exhausted until installed.
    pub(crate) fn empty() -> Self {
        Self {
            #[cfg(feature = "cache-padded")]
            cursor: crossbeam_utils::CachePadded::new(AtomicU64::new(0)),
            #[cfg(not(feature = "cache-padded"))]
            cursor: AtomicU64::new(0),
            max_id: 0,
            step: 0,
        }
    }

    /// Claims the next ID in the range.
    ///
    /// Returns `None` once the cursor has reached `max_id`.
    #[inline]
    pub(crate) fn try_next(&self) -> Option<u64> {
        let id = self.cursor.fetch_add(1, Ordering::Relaxed);
        (id < self.max_id).then_some(id)
    }

    /// Fraction of the range still available, in `[0.0, 1.0]`.
    ///
    /// An uninstalled segment reports `0.0`.
    #[inline]
    pub(crate) fn remaining_fraction(&self) -> f64 {
        if self.step == 0 {
            return 0.0;
        }
        self.idle() as f64 / self.step as f64
    }

    /// Number of IDs still available.
    #[inline]
    pub(crate) fn idle(&self) -> u64 {
        self.max_id
            .saturating_sub(self.cursor.load(Ordering::Relaxed))
    }

    /// Points the segment at the range `[max_id - step, max_id)`.
    ///
    /// Taking `&mut self` means no reader can be mid-`try_next` on it.
    ///
    /// # Panics
    ///
    /// Debug builds assert `step <= max_id`; a store never grants a range
    /// that starts below zero.
    pub(crate) fn install(&mut self, max_id: u64, step: u64) {
        debug_assert!(step <= max_id, "range [{max_id} - {step}, {max_id}) underflows");
        self.cursor
            .store(max_id.saturating_sub(step), Ordering::Relaxed);
        self.max_id = max_id;
        self.step = step;
    }

    /// Snapshot of the current state.
    pub(crate) fn view(&self) -> SegmentView {
        SegmentView {
            cursor: self.cursor.load(Ordering::Relaxed),
            max_id: self.max_id,
            step: self.step,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        collections::HashSet,
        sync::{Arc, Mutex},
        thread::scope,
    };

    #[test]
    fn empty_segment_is_exhausted() {
        let segment = Segment::empty();
        assert_eq!(segment.try_next(), None);
        assert_eq!(segment.remaining_fraction(), 0.0);
        assert_eq!(segment.idle(), 0);
    }

    #[test]
    fn hands_out_exactly_the_installed_range() {
        let mut segment = Segment::empty();
        segment.install(1000, 10);

        let ids: Vec<u64> = core::iter::from_fn(|| segment.try_next()).collect();
        assert_eq!(ids, (990..1000).collect::<Vec<_>>());
        assert_eq!(segment.try_next(), None);
        assert_eq!(segment.try_next(), None);
    }

    #[test]
    fn remaining_fraction_tracks_consumption() {
        let mut segment = Segment::empty();
        segment.install(100, 100);
        assert_eq!(segment.remaining_fraction(), 1.0);

        for _ in 0..90 {
            segment.try_next().unwrap();
        }
        assert!((segment.remaining_fraction() - 0.1).abs() < f64::EPSILON);
        assert_eq!(segment.idle(), 10);

        while segment.try_next().is_some() {}
        // Overshooting reads must not underflow the fraction.
        assert_eq!(segment.remaining_fraction(), 0.0);
    }

    #[test]
    fn reinstall_resets_cursor() {
        let mut segment = Segment::empty();
        segment.install(10, 10);
        while segment.try_next().is_some() {}

        segment.install(30, 20);
        assert_eq!(segment.try_next(), Some(10));
        assert_eq!(
            segment.view(),
            SegmentView {
                cursor: 11,
                max_id: 30,
                step: 20
            }
        );
    }

    #[test]
    fn concurrent_readers_never_duplicate_or_overrun() {
        const THREADS: usize = 8;
        const STEP: u64 = 10_000;

        let mut segment = Segment::empty();
        segment.install(STEP * 2, STEP);
        let segment = Arc::new(segment);
        let seen = Arc::new(Mutex::new(HashSet::with_capacity(STEP as usize)));

        scope(|s| {
            for _ in 0..THREADS {
                let segment = Arc::clone(&segment);
                let seen = Arc::clone(&seen);
                s.spawn(move || {
                    while let Some(id) = segment.try_next() {
                        assert!((STEP..STEP * 2).contains(&id));
                        assert!(seen.lock().unwrap().insert(id));
                    }
                });
            }
        });

        assert_eq!(seen.lock().unwrap().len(), STEP as usize);
    }
}
