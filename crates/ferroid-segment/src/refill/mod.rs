//! Background refill pool.
//!
//! This module defines the [`RefillScheduler`], a small elastic thread pool
//! that runs segment refills off the allocation path. Requests are handed
//! over a zero-capacity (rendezvous) channel, so a send only succeeds when a
//! worker is idle and waiting:
//!
//! - `core_workers` threads are started up front and live until shutdown.
//! - When every worker is busy, an extra thread is spawned for the request,
//!   up to `max_workers`. Extra threads exit after `keep_alive` of idleness.
//! - When the pool is saturated the request is rejected. The caller clears
//!   its in-flight flag and a later allocation retries.

mod worker;

pub(crate) use worker::RefillRequest;

use core::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use worker::{WorkerContext, worker_loop};

use crate::{AllocatorConfig, Error, Result, SegmentStore, buffer::SegmentBuffer};

/// Elastic pool of refill threads shared by every tag of one allocator.
pub(crate) struct RefillScheduler {
    tx: Sender<RefillRequest>,
    rx: Receiver<RefillRequest>,
    store: Arc<dyn SegmentStore>,
    core_workers: usize,
    max_workers: usize,
    keep_alive: Duration,
    shutdown_timeout: Duration,
    live: Arc<AtomicUsize>,
    next_worker_id: AtomicUsize,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl RefillScheduler {
    /// Starts the core workers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] if a core thread cannot be started. Threads
    /// started before the failure are shut down again.
    pub(crate) fn new(store: Arc<dyn SegmentStore>, config: &AllocatorConfig) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded(0);
        let scheduler = Self {
            tx,
            rx,
            store,
            core_workers: config.core_workers,
            max_workers: config.max_workers,
            keep_alive: config.keep_alive,
            shutdown_timeout: config.shutdown_timeout,
            live: Arc::new(AtomicUsize::new(0)),
            next_worker_id: AtomicUsize::new(0),
            handles: Mutex::new(Vec::with_capacity(config.max_workers)),
            shut_down: AtomicBool::new(false),
        };

        for _ in 0..scheduler.core_workers {
            scheduler.live.fetch_add(1, Ordering::AcqRel);
            scheduler.spawn_worker(None)?;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            core = scheduler.core_workers,
            max = scheduler.max_workers,
            "Refill pool started"
        );
        Ok(scheduler)
    }

    /// Hands a refill of `buffer` to an idle worker, or to a freshly spawned
    /// one if none is idle.
    ///
    /// The caller must hold the buffer's in-flight flag; the worker releases
    /// it when the refill ends.
    ///
    /// # Errors
    ///
    /// - [`Error::ShutDown`] after [`RefillScheduler::shutdown`].
    /// - [`Error::RefillRejected`] if `max_workers` are all busy.
    /// - [`Error::Spawn`] if the extra thread cannot be started.
    pub(crate) fn submit(&self, buffer: Arc<SegmentBuffer>) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::ShutDown);
        }

        let request = RefillRequest::Refill {
            buffer: Arc::clone(&buffer),
        };
        let request = match self.tx.try_send(request) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(request)) => request,
            Err(TrySendError::Disconnected(_)) => return Err(Error::ShutDown),
        };

        if !self.reserve_worker() {
            return Err(Error::RefillRejected {
                tag: buffer.tag().to_string(),
            });
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(tag = buffer.tag(), "All refill workers busy, spawning extra");
        self.spawn_worker(Some(request))
    }

    /// Number of worker threads currently alive.
    pub(crate) fn live_workers(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Stops accepting refills and asks every worker to exit.
    ///
    /// Each worker gets up to `shutdown_timeout` to pick up the request and
    /// again to acknowledge it. Threads are joined only when all of them
    /// acknowledged; a worker stuck in store I/O is left to finish on its own.
    pub(crate) fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        // === Phase 1: Notify workers ===
        let live = self.live.load(Ordering::Acquire);
        #[cfg(feature = "tracing")]
        tracing::debug!("Notifying {live} refill workers to shut down");

        let mut acks = Vec::with_capacity(live);
        for _i in 0..live {
            let (response, ack) = crossbeam_channel::bounded(1);
            match self
                .tx
                .send_timeout(RefillRequest::Shutdown { response }, self.shutdown_timeout)
            {
                Ok(()) => acks.push(ack),
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("No refill worker took shutdown request {_i}: {_e}");
                }
            }
        }

        // === Phase 2: Wait for acknowledgements ===
        let mut all_acked = acks.len() == live;
        for ack in acks {
            if ack.recv_timeout(self.shutdown_timeout).is_err() {
                all_acked = false;
                #[cfg(feature = "tracing")]
                tracing::warn!("Refill worker shutdown timed out");
            }
        }

        // === Phase 3: Reap threads ===
        let handles = core::mem::take(&mut *self.handles.lock());
        if all_acked {
            for handle in handles {
                if handle.join().is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Refill worker panicked");
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Refill pool shutdown complete");
    }

    /// Claims a live-worker slot below `max_workers`.
    fn reserve_worker(&self) -> bool {
        let mut live = self.live.load(Ordering::Acquire);
        while live < self.max_workers {
            match self.live.compare_exchange_weak(
                live,
                live + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => live = actual,
            }
        }
        false
    }

    /// Starts a worker for an already reserved slot.
    fn spawn_worker(&self, first: Option<RefillRequest>) -> Result<()> {
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let ctx = WorkerContext {
            worker_id,
            rx: self.rx.clone(),
            store: Arc::clone(&self.store),
            live: Arc::clone(&self.live),
            core_workers: self.core_workers,
            keep_alive: self.keep_alive,
        };

        let spawned = thread::Builder::new()
            .name(format!("segment-refill-{worker_id}"))
            .spawn(move || worker_loop(ctx, first));

        match spawned {
            Ok(handle) => {
                let mut handles = self.handles.lock();
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
                Ok(())
            }
            Err(source) => {
                // The closure, and with it the slot guard, never ran.
                self.live.fetch_sub(1, Ordering::AcqRel);
                Err(Error::Spawn {
                    context: format!("refill worker {worker_id}"),
                    source,
                })
            }
        }
    }
}

impl Drop for RefillScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
