use core::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use std::sync::Arc;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::{SegmentStore, buffer::SegmentBuffer};

/// Messages handed to refill workers.
pub(crate) enum RefillRequest {
    /// Fetch the next range for `buffer` and install it.
    Refill { buffer: Arc<SegmentBuffer> },
    /// Stop the worker and acknowledge on `response`.
    Shutdown { response: Sender<()> },
}

/// Everything a worker thread owns.
pub(crate) struct WorkerContext {
    pub(crate) worker_id: usize,
    pub(crate) rx: Receiver<RefillRequest>,
    pub(crate) store: Arc<dyn SegmentStore>,
    pub(crate) live: Arc<AtomicUsize>,
    pub(crate) core_workers: usize,
    pub(crate) keep_alive: Duration,
}

/// Worker thread body.
///
/// Processes refill requests until told to shut down or the channel closes.
/// A worker beyond the core count exits after idling for `keep_alive`.
///
/// # Request Types
///
/// - [`RefillRequest::Refill`]: runs [`SegmentBuffer::refill`] against the
///   store.
/// - [`RefillRequest::Shutdown`]: acknowledges and stops.
pub(crate) fn worker_loop(ctx: WorkerContext, first: Option<RefillRequest>) {
    let mut slot = LiveSlot {
        live: Arc::clone(&ctx.live),
        held: true,
    };
    let _worker_id = ctx.worker_id;

    #[cfg(feature = "tracing")]
    tracing::trace!("Refill worker {_worker_id} started");

    let mut next = first;
    loop {
        let request = match next.take() {
            Some(request) => request,
            None => match ctx.rx.recv_timeout(ctx.keep_alive) {
                Ok(request) => request,
                Err(RecvTimeoutError::Timeout) => {
                    if slot.try_retire(ctx.core_workers) {
                        #[cfg(feature = "tracing")]
                        tracing::debug!("Refill worker {_worker_id} idle, retiring");
                        break;
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            },
        };

        match request {
            RefillRequest::Refill { buffer } => buffer.refill(&*ctx.store),
            RefillRequest::Shutdown { response } => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Refill worker {_worker_id} received shutdown signal");

                if response.send(()).is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Refill worker {_worker_id} failed to acknowledge shutdown");
                }
                break;
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Refill worker {_worker_id} stopped");
}

/// One unit of the pool's live-worker count, returned when the worker exits
/// for any reason (panics included).
struct LiveSlot {
    live: Arc<AtomicUsize>,
    held: bool,
}

impl LiveSlot {
    /// Gives the slot back if the pool is above its core size.
    fn try_retire(&mut self, core_workers: usize) -> bool {
        let mut live = self.live.load(Ordering::Acquire);
        while live > core_workers {
            match self.live.compare_exchange_weak(
                live,
                live - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.held = false;
                    return true;
                }
                Err(actual) => live = actual,
            }
        }
        false
    }
}

impl Drop for LiveSlot {
    fn drop(&mut self) {
        if self.held {
            self.live.fetch_sub(1, Ordering::AcqRel);
        }
    }
}
