//! Store gateway: the only integration point with durable storage.
//!
//! The allocator needs exactly three things from a store, scoped by business
//! tag: an atomic "bump `max_id` by `step`", a plain read of `max_id`, and the
//! list of known tags. Backends:
//!
//! - [`MemoryStore`] - in-process map, suitable for a single process and tests.
//! - [`SqliteStore`] - SQLite table shared by every process opening the same
//!   file (feature `sqlite`).

mod error;
mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use error::*;
pub use memory::*;
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
#[cfg(feature = "sqlite")]
pub use sqlite::*;

use std::sync::Arc;

/// A minimal interface over the table backing the allocator.
///
/// Implementations must make [`SegmentStore::bump_max_id`] atomic with
/// respect to concurrent bumps of the same tag, including bumps from other
/// processes sharing the store. That single property is what makes ranges
/// handed to different allocators disjoint.
pub trait SegmentStore: Send + Sync {
    /// Atomically adds `step` to the tag's `max_id` and returns the new value.
    ///
    /// If the tag has no row yet, one is inserted with `max_id = step`. The
    /// caller owns the range `[returned - step, returned)`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on connectivity, constraint or overflow
    /// failures. No range is granted in that case.
    fn bump_max_id(&self, tag: &str, step: u64) -> Result<u64, StoreError>;

    /// Reads the tag's current `max_id` without modifying it.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store cannot be read.
    fn max_id(&self, tag: &str) -> Result<Option<u64>, StoreError>;

    /// Lists every tag known to the store.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store cannot be read.
    fn list_tags(&self) -> Result<Vec<String>, StoreError>;
}

impl<S: SegmentStore + ?Sized> SegmentStore for Arc<S> {
    fn bump_max_id(&self, tag: &str, step: u64) -> Result<u64, StoreError> {
        (**self).bump_max_id(tag, step)
    }

    fn max_id(&self, tag: &str) -> Result<Option<u64>, StoreError> {
        (**self).max_id(tag)
    }

    fn list_tags(&self) -> Result<Vec<String>, StoreError> {
        (**self).list_tags()
    }
}
