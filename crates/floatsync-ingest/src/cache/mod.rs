//! Disk staging and the in-memory resource cache.

pub mod downloader;
pub mod negative;
pub mod resource;
pub mod retry;

pub use downloader::Downloader;
pub use negative::NegativeCache;
pub use resource::{CacheStatus, OpenedResource, ResourceCache};
pub use retry::{Backoff, RetryPolicy};
