//! Error types for the segment allocator.
//!
//! ## Error Cases
//! - `Store`: the backing store failed while bootstrapping or initializing a
//!   tag. Failures during background refills are logged, never returned.
//! - `SegmentsExhausted`: both segments of a tag are drained and the refill has
//!   not landed yet. Retry with backoff.
//! - `RefillRejected`: the refill pool had no capacity for a new task.
//! - `RetriesExhausted`: a retrying helper gave up before an ID was ready.
//! - `Spawn`: a background thread could not be started.
//! - `InvalidTag` / `InvalidConfig`: caller mistakes.
//! - `ShutDown`: the allocator has been shut down.
//!
//! "Not ready" is deliberately not an error: see [`IdStatus::Pending`].
//!
//! [`IdStatus::Pending`]: crate::IdStatus::Pending

use crate::store::StoreError;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for the segment allocator.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The store failed during a synchronous bootstrap or initialization.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The current segment is drained and the next one is not ready.
    #[error("segments exhausted for tag '{tag}': refill still pending")]
    SegmentsExhausted { tag: String },

    /// The refill pool is saturated and refused the task.
    #[error("refill rejected for tag '{tag}': worker pool saturated")]
    RefillRejected { tag: String },

    /// A retrying helper ran out of attempts while the tag stayed pending.
    #[error("no ID for tag '{tag}' after {attempts} attempts")]
    RetriesExhausted { tag: String, attempts: u32 },

    /// The OS refused to start a background thread.
    #[error("failed to spawn {context}: {source}")]
    Spawn {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Tags must be non-empty.
    #[error("invalid tag: {reason}")]
    InvalidTag { reason: String },

    /// The allocator configuration failed validation.
    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },

    /// The allocator has been shut down.
    #[error("allocator is shut down")]
    ShutDown,
}

impl Error {
    /// Returns `true` for failures a caller should retry with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SegmentsExhausted { .. } | Self::RefillRejected { .. } => true,
            Self::Store(err) => err.is_transient(),
            Self::RetriesExhausted { .. }
            | Self::Spawn { .. }
            | Self::InvalidTag { .. }
            | Self::InvalidConfig { .. }
            | Self::ShutDown => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(
            Error::SegmentsExhausted {
                tag: "t".to_string()
            }
            .is_retryable()
        );
        assert!(
            Error::Store(StoreError::Unavailable {
                context: "down".to_string()
            })
            .is_retryable()
        );
        assert!(
            !Error::Store(StoreError::Overflow {
                tag: "t".to_string()
            })
            .is_retryable()
        );
        assert!(!Error::ShutDown.is_retryable());
    }
}
