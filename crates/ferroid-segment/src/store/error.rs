//! Errors surfaced by [`SegmentStore`] backends.
//!
//! A store error never implies partial success: a bump either advanced
//! `max_id` and returned the new value, or it did not happen.
//!
//! [`SegmentStore`]: crate::SegmentStore

type BoxError = Box<dyn core::error::Error + Send + Sync + 'static>;

/// Failure talking to, or reading from, the backing store.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// The store could not be reached or refused the operation.
    #[error("store unavailable: {context}")]
    Unavailable { context: String },

    /// The store is locked by another writer and the busy timeout elapsed.
    #[error("store busy: {context}")]
    Busy {
        context: String,
        #[source]
        source: BoxError,
    },

    /// Any other error reported by the backend driver.
    #[error("backend error: {context}")]
    Backend {
        context: String,
        #[source]
        source: BoxError,
    },

    /// A row holds a value the allocator cannot interpret.
    #[error("corrupt row for tag '{tag}': {reason}")]
    Corrupt { tag: String, reason: String },

    /// Bumping `max_id` would overflow the 64-bit ID space.
    #[error("max_id overflow for tag '{tag}'")]
    Overflow { tag: String },
}

impl StoreError {
    /// Returns `true` if retrying the same operation later may succeed.
    ///
    /// Corrupt rows and overflow are permanent for a tag.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Busy { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let err = StoreError::Unavailable {
            context: "connection reset".to_string(),
        };
        assert!(err.is_transient());

        let err = StoreError::Overflow {
            tag: "orders".to_string(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn display_names_the_tag() {
        let err = StoreError::Corrupt {
            tag: "orders".to_string(),
            reason: "negative max_id".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("orders"));
        assert!(msg.contains("negative max_id"));
    }

    #[test]
    fn backend_keeps_source() {
        use core::error::Error as _;

        let io = std::io::Error::other("disk gone");
        let err = StoreError::Backend {
            context: "bump orders".to_string(),
            source: Box::new(io),
        };
        assert!(err.source().is_some());
        assert!(!err.is_transient());
    }
}
