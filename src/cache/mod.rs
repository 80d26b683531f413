//! Expiring in-memory cache for remote reads.
//!
//! This module provides the store the query layer reads through:
//! - Deterministic keys built from service, method and parameters
//! - Per-entry TTL, with stale entries kept as a fallback until invalidated
//! - Invalidation by exact key, by key prefix, or of everything
//! - Single-flight fetches: one running fetch per key, shared by all callers

mod entry;
mod key;
mod store;

pub use entry::{age_display, CacheEntry, CacheLookup};
pub use key::CacheKey;
pub use store::{CacheStats, CacheStore, EntrySummary, SharedFetch};
