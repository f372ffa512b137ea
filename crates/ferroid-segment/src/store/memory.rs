use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::store::{SegmentStore, StoreError};

/// One row of the allocation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Row {
    max_id: u64,
    step: u64,
}

/// An in-process [`SegmentStore`] backed by a mutex-guarded map.
///
/// Every bump happens under the mutex, so ranges are disjoint for all
/// allocators sharing this store (typically through an `Arc`). Nothing is
/// persisted; a restart begins again from the seeded rows.
///
/// # Example
///
/// ```
/// use ferroid_segment::{MemoryStore, SegmentStore};
///
/// let store = MemoryStore::new().with_tag("orders", 0, 1000);
/// assert_eq!(store.bump_max_id("orders", 1000).unwrap(), 1000);
/// assert_eq!(store.bump_max_id("orders", 1000).unwrap(), 2000);
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<String, Row>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a row, replacing any existing one for `tag`.
    #[must_use]
    pub fn with_tag(self, tag: impl Into<String>, max_id: u64, step: u64) -> Self {
        self.rows.lock().insert(tag.into(), Row { max_id, step });
        self
    }

    /// Removes a tag's row, as an operator retiring the tag would.
    ///
    /// Returns `true` if the row existed.
    pub fn remove_tag(&self, tag: &str) -> bool {
        self.rows.lock().remove(tag).is_some()
    }

    /// The step recorded with the tag's last bump, if the tag exists.
    pub fn step(&self, tag: &str) -> Option<u64> {
        self.rows.lock().get(tag).map(|row| row.step)
    }
}

impl SegmentStore for MemoryStore {
    fn bump_max_id(&self, tag: &str, step: u64) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock();
        match rows.get_mut(tag) {
            Some(row) => {
                row.max_id = row
                    .max_id
                    .checked_add(step)
                    .ok_or_else(|| StoreError::Overflow {
                        tag: tag.to_string(),
                    })?;
                row.step = step;
                Ok(row.max_id)
            }
            None => {
                rows.insert(tag.to_string(), Row { max_id: step, step });
                Ok(step)
            }
        }
    }

    fn max_id(&self, tag: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.rows.lock().get(tag).map(|row| row.max_id))
    }

    fn list_tags(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.rows.lock().keys().cloned().collect())
    }
}
