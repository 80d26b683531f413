//! Async query abstraction for data fetching with caching support.
//!
//! Inspired by TanStack Query, this module provides a `Query<T>` type that ties
//! a cache key to a fetch function, serves fresh values from the
//! [`CacheStore`], shares one in-flight fetch per key, and keeps
//! loading/refreshing/error state for the screen that owns it.
//!
//! # Example
//!
//! ```ignore
//! let key = CacheKey::build("teacher", "getTeacherGroups", &json!({ "teacherId": id }))?;
//! let db = db.clone();
//! let groups: Query<Vec<Group>> = client.query(
//!     key,
//!     move || {
//!         let db = db.clone();
//!         async move { db.teacher_groups(&id).await.map_err(FetchError::new) }
//!     },
//!     QueryOptions::default().with_auto_refresh(Duration::from_secs(300)),
//! );
//!
//! // On mount
//! let result = groups.request().await;
//!
//! // In render
//! match result.status() {
//!     QueryStatus::Loading => render_spinner(),
//!     QueryStatus::Error => render_with_retry(result.value, result.error),
//!     _ => render_data(result.value),
//! }
//! ```

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::{CacheKey, CacheStore, SharedFetch};
use crate::error::FetchError;
use crate::refresh::{RefreshCoordinator, Registration};

/// Default bound on a single fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time a fetched value stays fresh.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Default auto-refresh period.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync>;

/// Limits applied to every fetch issued through a [`QueryClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
  /// `None` lets a hung fetch run forever
  pub timeout: Option<Duration>,
}

impl Default for FetchPolicy {
  fn default() -> Self {
    Self {
      timeout: Some(DEFAULT_FETCH_TIMEOUT),
    }
  }
}

/// Per-query settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
  pub ttl: Duration,
  pub auto_refresh: bool,
  pub interval: Duration,
  /// Bypass the cache on every `request`
  pub force_refresh: bool,
}

impl Default for QueryOptions {
  fn default() -> Self {
    Self {
      ttl: DEFAULT_TTL,
      auto_refresh: false,
      interval: DEFAULT_REFRESH_INTERVAL,
      force_refresh: false,
    }
  }
}

impl QueryOptions {
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  /// Register with the refresh coordinator, re-fetching every `interval`.
  ///
  /// A zero interval joins the bulk and edge-triggered sweeps without a timer.
  pub fn with_auto_refresh(mut self, interval: Duration) -> Self {
    self.auto_refresh = true;
    self.interval = interval;
    self
  }

  pub fn forcing_refresh(mut self) -> Self {
    self.force_refresh = true;
    self
  }
}

/// What a consumer renders from.
#[derive(Debug, Clone)]
pub struct QueryResult<T> {
  /// Latest value; kept when a later fetch fails
  pub value: Option<T>,
  /// No value yet and the first fetch is running
  pub is_loading: bool,
  /// A value is held and a fetch is running
  pub is_refreshing: bool,
  /// Last failure, cleared by the next success
  pub error: Option<FetchError>,
  pub last_updated: Option<DateTime<Utc>>,
}

impl<T> Default for QueryResult<T> {
  fn default() -> Self {
    Self {
      value: None,
      is_loading: false,
      is_refreshing: false,
      error: None,
      last_updated: None,
    }
  }
}

/// Coarse state of a query, for choosing what to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// Nothing requested yet
  Idle,
  Loading,
  Refreshing,
  Success,
  /// Last fetch failed; a previous value may still be shown
  Error,
}

impl<T> QueryResult<T> {
  pub fn status(&self) -> QueryStatus {
    if self.is_loading {
      QueryStatus::Loading
    } else if self.is_refreshing {
      QueryStatus::Refreshing
    } else if self.error.is_some() {
      QueryStatus::Error
    } else if self.value.is_some() {
      QueryStatus::Success
    } else {
      QueryStatus::Idle
    }
  }
}

/// Factory for queries, owned by the application's composition root.
///
/// Cloning shares the same store and coordinator.
#[derive(Clone, Debug)]
pub struct QueryClient {
  store: CacheStore,
  coordinator: RefreshCoordinator,
  policy: FetchPolicy,
}

impl QueryClient {
  pub fn new(coordinator: RefreshCoordinator) -> Self {
    Self {
      store: coordinator.store().clone(),
      coordinator,
      policy: FetchPolicy::default(),
    }
  }

  pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  pub fn coordinator(&self) -> &RefreshCoordinator {
    &self.coordinator
  }

  pub fn policy(&self) -> FetchPolicy {
    self.policy
  }

  /// Create a query for `key`.
  ///
  /// With `auto_refresh`, the query registers with the coordinator until it is
  /// disposed or dropped. Must be called inside a tokio runtime.
  pub fn query<T, F, Fut>(&self, key: CacheKey, fetcher: F, options: QueryOptions) -> Query<T>
  where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
  {
    let inner = Arc::new(QueryInner {
      key,
      fetcher: Arc::new(move || fetcher().boxed()),
      options,
      store: self.store.clone(),
      policy: self.policy,
      state: Mutex::new(QueryResult::default()),
    });

    let registration = options.auto_refresh.then(|| {
      let target = inner.clone();
      self.coordinator.register(
        inner.key.clone(),
        move || {
          let target = target.clone();
          async move {
            // Own task: aborting the timer must not cut the query's fetch short
            tokio::spawn(async move { target.fetch().await })
              .await
              .map_err(|e| FetchError::Aborted(e.to_string()))?
          }
        },
        options.interval,
      )
    });

    Query {
      inner,
      registration,
    }
  }
}

/// One consumer's interest in a cache key.
///
/// Not Clone: each screen owns its own query. Dropping it unregisters any
/// auto-refresh subscription.
pub struct Query<T> {
  inner: Arc<QueryInner<T>>,
  registration: Option<Registration>,
}

struct QueryInner<T> {
  key: CacheKey,
  fetcher: FetcherFn<T>,
  options: QueryOptions,
  store: CacheStore,
  policy: FetchPolicy,
  state: Mutex<QueryResult<T>>,
}

impl<T> Query<T>
where
  T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
  pub fn key(&self) -> &CacheKey {
    &self.inner.key
  }

  pub fn options(&self) -> &QueryOptions {
    &self.inner.options
  }

  /// Current state without fetching.
  pub fn snapshot(&self) -> QueryResult<T> {
    self.inner.state().clone()
  }

  /// Serve from the cache when fresh, otherwise fetch.
  ///
  /// A stale cached value is shown while the fetch runs and kept if it fails.
  pub async fn request(&self) -> QueryResult<T> {
    if self.inner.options.force_refresh {
      return self.force_refresh().await;
    }
    // Failures are recorded in the returned state
    let _ = self.inner.load().await;
    self.snapshot()
  }

  /// Fetch regardless of freshness, joining a fetch already in flight.
  pub async fn force_refresh(&self) -> QueryResult<T> {
    let _ = self.inner.fetch().await;
    self.snapshot()
  }

  /// Drop the cached entry; the next request fetches again.
  pub fn invalidate(&self) -> bool {
    debug!(key = %self.inner.key, "Invalidating query");
    self.inner.store.invalidate_key(&self.inner.key)
  }

  /// Show `value` immediately and cache it until the next real fetch.
  pub fn set_optimistic(&self, value: T) -> Result<(), FetchError> {
    let json = encode(&self.inner.key, &value)?;
    self
      .inner
      .store
      .put(&self.inner.key, json, self.inner.options.ttl);

    let mut state = self.inner.state();
    state.value = Some(value);
    state.last_updated = Some(Utc::now());
    Ok(())
  }

  pub fn is_registered(&self) -> bool {
    self.registration.as_ref().is_some_and(|r| r.is_active())
  }

  /// Stop auto-refresh. Safe to call more than once.
  pub fn dispose(&self) {
    if let Some(registration) = &self.registration {
      registration.cancel();
    }
  }
}

impl<T> QueryInner<T>
where
  T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
  fn state(&self) -> MutexGuard<'_, QueryResult<T>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn read_cache(&self) -> Option<(T, bool, DateTime<Utc>)> {
    let hit = self.store.get(&self.key)?;
    match decode(&self.key, hit.value) {
      Ok(value) => Some((value, hit.fresh, hit.updated_at)),
      Err(e) => {
        warn!(key = %self.key, error = %e, "Ignoring cached value");
        None
      }
    }
  }

  async fn load(&self) -> Result<(), FetchError> {
    if let Some((value, fresh, updated_at)) = self.read_cache() {
      let mut state = self.state();
      state.value = Some(value);
      state.last_updated = Some(updated_at);
      if fresh {
        state.error = None;
        debug!(key = %self.key, "Cache hit");
        return Ok(());
      }
      debug!(key = %self.key, "Cache stale");
    } else {
      debug!(key = %self.key, "Cache miss");
    }
    self.fetch().await
  }

  async fn fetch(&self) -> Result<(), FetchError> {
    {
      let mut state = self.state();
      if state.value.is_some() {
        state.is_refreshing = true;
      } else {
        state.is_loading = true;
      }
    }

    let result = self
      .start_fetch()
      .await
      .and_then(|json| decode(&self.key, json));

    let mut state = self.state();
    state.is_loading = false;
    state.is_refreshing = false;
    match result {
      Ok(value) => {
        state.value = Some(value);
        state.error = None;
        state.last_updated = Some(Utc::now());
        Ok(())
      }
      Err(e) => {
        warn!(key = %self.key, error = %e, "Fetch failed, keeping previous value");
        state.error = Some(e.clone());
        Err(e)
      }
    }
  }

  fn start_fetch(&self) -> SharedFetch {
    let fetcher = self.fetcher.clone();
    let timeout = self.policy.timeout;
    let key = self.key.clone();

    self
      .store
      .fetch_shared(&self.key, self.options.ttl, move || async move {
        let pending = fetcher();
        let value = match timeout {
          Some(limit) => tokio::time::timeout(limit, pending)
            .await
            .map_err(|_| FetchError::Timeout(limit))??,
          None => pending.await?,
        };
        encode(&key, &value)
      })
  }
}

fn encode<T: Serialize>(key: &CacheKey, value: &T) -> Result<Value, FetchError> {
  serde_json::to_value(value).map_err(|e| FetchError::Encode {
    key: key.to_string(),
    reason: e.to_string(),
  })
}

fn decode<T: DeserializeOwned>(key: &CacheKey, value: Value) -> Result<T, FetchError> {
  serde_json::from_value(value).map_err(|e| FetchError::Decode {
    key: key.to_string(),
    reason: e.to_string(),
  })
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.inner.key)
      .field("options", &self.inner.options)
      .field("registration", &self.registration)
      .finish_non_exhaustive()
  }
}
