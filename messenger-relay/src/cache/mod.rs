//! On-disk artifact cache with read-time validation.

mod store;

pub use store::{CacheConfig, CacheStats, CacheStore};
