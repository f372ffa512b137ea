/// Represents the result of asking the allocator for an ID.
///
/// This type models the outcome of [`Allocator::generate_id`]:
///
/// - [`IdStatus::Ready`] carries a freshly issued ID. Any `u64` is valid here,
///   including `0`, which is the first ID of a newly bootstrapped tag.
/// - [`IdStatus::Pending`] means the allocator cannot serve this tag yet and
///   the caller should retry shortly.
///
/// # Example
///
/// ```
/// use ferroid_segment::{Allocator, IdStatus, MemoryStore};
///
/// let store = MemoryStore::new().with_tag("orders", 0, 1000);
/// let allocator = Allocator::builder(store).build().unwrap();
///
/// match allocator.generate_id("orders").unwrap() {
///     IdStatus::Ready { id } => println!("ID: {id}"),
///     IdStatus::Pending { reason } => println!("retry later: {reason:?}"),
/// }
/// ```
///
/// [`Allocator::generate_id`]: crate::Allocator::generate_id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStatus {
    /// A unique ID was issued.
    Ready {
        /// The issued ID.
        id: u64,
    },
    /// No ID could be issued on this call.
    Pending {
        /// Why the call could not be served.
        reason: PendingReason,
    },
}

/// Why an [`IdStatus::Pending`] was returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingReason {
    /// The allocator has not completed its first tag-list load.
    CacheLoading,
    /// The tag was unknown and has just been bootstrapped in the store.
    NewTag,
}

impl IdStatus {
    /// Returns the ID if one was issued.
    pub const fn ready(self) -> Option<u64> {
        match self {
            Self::Ready { id } => Some(id),
            Self::Pending { .. } => None,
        }
    }

    /// Returns `true` if an ID was issued.
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

#[cfg(test)]
impl IdStatus {
    pub(crate) fn unwrap_ready(self) -> u64 {
        match self {
            Self::Ready { id } => id,
            Self::Pending { reason } => panic!("expected Ready, got Pending({reason:?})"),
        }
    }

    pub(crate) fn unwrap_pending(self) -> PendingReason {
        match self {
            Self::Ready { id } => panic!("expected Pending, got Ready({id})"),
            Self::Pending { reason } => reason,
        }
    }
}
