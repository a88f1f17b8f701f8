//! op-cache: namespaced catalog cache
//!
//! Features:
//! - TTL-bound entries on the monotonic clock
//! - SHA-256 integrity hash over canonical JSON, checked on every read
//! - Anchored `*` pattern invalidation across all keys
//! - LRU capacity bound and a global on/off switch
//! - Snapshot persistence for warm starts

pub mod record;
pub mod snapshot;
pub mod store;

pub use record::{integrity_hash, CacheRecord, WrappedRecord};
pub use store::{glob_to_regex, CacheOptions, CacheStats, CatalogCache};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::store::{CacheOptions, CacheStats, CatalogCache};
}
