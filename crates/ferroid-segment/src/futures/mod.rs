mod allocator;
mod sleep_provider;
#[cfg(feature = "async-tokio")]
mod tokio;

#[cfg_attr(docsrs, doc(cfg(feature = "futures")))]
pub use allocator::*;
#[cfg_attr(docsrs, doc(cfg(feature = "futures")))]
pub use sleep_provider::*;
#[cfg_attr(docsrs, doc(cfg(feature = "async-tokio")))]
#[cfg(feature = "async-tokio")]
pub use self::tokio::*;
