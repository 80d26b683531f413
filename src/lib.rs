//! Read cache and background refresh for a portal client.
//!
//! Screens ask a [`query::QueryClient`] for data identified by service, method
//! and parameters. Values are served from an expiring in-memory
//! [`cache::CacheStore`] when fresh, fetched once per key when not, and kept
//! current by a [`refresh::RefreshCoordinator`] that re-fetches on timers and
//! when the device reconnects or the app returns to the foreground.

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod query;
pub mod refresh;

pub use cache::{CacheKey, CacheStore};
pub use error::{FetchError, KeyError};
pub use query::{FetchPolicy, Query, QueryClient, QueryOptions, QueryResult, QueryStatus};
pub use refresh::{AmbientState, RefreshCoordinator, Registration};
