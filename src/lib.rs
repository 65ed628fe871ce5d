//! Thumbnail caching engine for the RAW browser.
//!
//! A bounded in-memory LRU of decoded thumbnails sits in front of a sharded
//! on-disk JPEG cache and a SQLite metadata store. Background fetches are
//! bounded by a semaphore and discard themselves when the viewport moves on.

pub mod cache;
pub mod error;
pub mod raw;
pub mod scan;
pub mod state;

pub use cache::coordinator::{LoaderStats, ThumbnailCache};
pub use cache::key::CacheKey;
pub use error::{CacheError, Result};
pub use state::config::CacheConfig;
pub use state::store::MetadataStore;
