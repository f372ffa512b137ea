mod allocator;
mod buffer;
mod cache;
mod config;
mod error;
#[cfg(feature = "futures")]
mod futures;
mod refill;
mod segment;
mod status;
mod store;
#[cfg(test)]
mod testing;

pub use crate::allocator::{Allocator, AllocatorBuilder, RetryPolicy};
pub use crate::buffer::BufferView;
pub use crate::cache::RefreshOutcome;
pub use crate::config::*;
pub use crate::error::*;
#[cfg(feature = "futures")]
pub use crate::futures::*;
pub use crate::segment::SegmentView;
pub use crate::status::*;
pub use crate::store::*;
