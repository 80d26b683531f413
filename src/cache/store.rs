//! In-memory expiring store with single-flight fetches.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use super::entry::{CacheEntry, CacheLookup};
use super::key::CacheKey;
use crate::error::FetchError;

/// Handle to a fetch that may be awaited by any number of callers.
pub type SharedFetch = Shared<BoxFuture<'static, Result<Value, FetchError>>>;

/// Counters for status displays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
  pub entries: usize,
  pub fresh: usize,
  pub in_flight: usize,
}

/// One line of the store listing.
#[derive(Debug, Clone)]
pub struct EntrySummary {
  pub key: CacheKey,
  pub age: String,
  pub fresh: bool,
}

/// Process-wide key/value store with per-entry TTL.
///
/// Entries and the in-flight fetch map live behind one mutex, so a completing
/// fetch writes its entry and retires its in-flight record atomically. The
/// lock is never held across an await. Cloning shares the same store.
#[derive(Clone, Default)]
pub struct CacheStore {
  state: Arc<Mutex<StoreState>>,
}

#[derive(Default)]
struct StoreState {
  entries: HashMap<CacheKey, CacheEntry>,
  in_flight: HashMap<CacheKey, InFlight>,
  next_flight: u64,
}

struct InFlight {
  id: u64,
  fetch: SharedFetch,
}

impl CacheStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, StoreState> {
    // Map mutations cannot leave the state half-written, so a poisoned lock is still usable
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Insert or replace the entry for `key`, restarting its TTL.
  pub fn put(&self, key: &CacheKey, value: Value, ttl: Duration) {
    self
      .lock()
      .entries
      .insert(key.clone(), CacheEntry::new(value, ttl));
  }

  /// Read an entry. Stale entries are returned with `fresh == false`.
  pub fn get(&self, key: &CacheKey) -> Option<CacheLookup> {
    self.lock().entries.get(key).map(|entry| CacheLookup {
      value: entry.value.clone(),
      fresh: entry.is_fresh(),
      updated_at: entry.updated_at,
    })
  }

  /// Remove a single entry. Returns whether it existed.
  pub fn invalidate_key(&self, key: &CacheKey) -> bool {
    self.lock().entries.remove(key).is_some()
  }

  /// Remove every entry whose key starts with `prefix`.
  pub fn invalidate_prefix(&self, prefix: &str) -> usize {
    let mut state = self.lock();
    let before = state.entries.len();
    state.entries.retain(|key, _| !key.starts_with(prefix));
    let removed = before - state.entries.len();
    debug!(prefix, removed, "Invalidated cache prefix");
    removed
  }

  /// Remove everything.
  pub fn clear(&self) -> usize {
    let mut state = self.lock();
    let removed = state.entries.len();
    state.entries.clear();
    removed
  }

  /// Run `fetch` for `key` unless a fetch for it is already running, in which
  /// case the running one is shared.
  ///
  /// The fetch runs as its own task: a successful result is stored with `ttl`
  /// even if every caller stopped waiting.
  pub fn fetch_shared<F, Fut>(&self, key: &CacheKey, ttl: Duration, fetch: F) -> SharedFetch
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
  {
    let mut state = self.lock();
    if let Some(flight) = state.in_flight.get(key) {
      debug!(key = %key, "Joining in-flight fetch");
      return flight.fetch.clone();
    }

    state.next_flight += 1;
    let id = state.next_flight;
    let store = self.clone();
    let task_key = key.clone();

    let handle = tokio::spawn(async move {
      let result = match AssertUnwindSafe(fetch()).catch_unwind().await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Aborted("fetch function panicked".to_string())),
      };
      store.complete(&task_key, id, ttl, &result);
      result
    });

    let fetch = async move {
      match handle.await {
        Ok(result) => result,
        Err(e) => Err(FetchError::Aborted(e.to_string())),
      }
    }
    .boxed()
    .shared();

    debug!(key = %key, flight = id, "Starting fetch");
    state.in_flight.insert(
      key.clone(),
      InFlight {
        id,
        fetch: fetch.clone(),
      },
    );
    fetch
  }

  fn complete(&self, key: &CacheKey, id: u64, ttl: Duration, result: &Result<Value, FetchError>) {
    let mut state = self.lock();
    if let Ok(value) = result {
      state
        .entries
        .insert(key.clone(), CacheEntry::new(value.clone(), ttl));
    }
    if state.in_flight.get(key).is_some_and(|f| f.id == id) {
      state.in_flight.remove(key);
    }
  }

  pub fn is_fetching(&self, key: &CacheKey) -> bool {
    self.lock().in_flight.contains_key(key)
  }

  pub fn stats(&self) -> CacheStats {
    let state = self.lock();
    CacheStats {
      entries: state.entries.len(),
      fresh: state.entries.values().filter(|e| e.is_fresh()).count(),
      in_flight: state.in_flight.len(),
    }
  }

  /// Entries sorted by key.
  pub fn summary(&self) -> Vec<EntrySummary> {
    let state = self.lock();
    let mut rows: Vec<EntrySummary> = state
      .entries
      .iter()
      .map(|(key, entry)| EntrySummary {
        key: key.clone(),
        age: entry.age_display(),
        fresh: entry.is_fresh(),
      })
      .collect();
    rows.sort_by(|a, b| a.key.cmp(&b.key));
    rows
  }
}

impl std::fmt::Debug for CacheStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CacheStore")
      .field("stats", &self.stats())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn key(raw: &str) -> CacheKey {
    CacheKey::from_raw(raw).unwrap()
  }

  #[tokio::test(start_paused = true)]
  async fn test_freshness_window() {
    let store = CacheStore::new();
    let k = key("teacher_getTeacherGroups_{}");
    store.put(&k, json!(["G1"]), Duration::from_secs(60));

    let hit = store.get(&k).unwrap();
    assert!(hit.fresh);
    assert_eq!(hit.value, json!(["G1"]));

    tokio::time::advance(Duration::from_secs(59)).await;
    assert!(store.get(&k).unwrap().fresh);

    tokio::time::advance(Duration::from_secs(1)).await;
    let stale = store.get(&k).unwrap();
    assert!(!stale.fresh);
    assert_eq!(stale.value, json!(["G1"]));

    // Still present long after expiry
    tokio::time::advance(Duration::from_secs(3600)).await;
    assert!(store.get(&k).is_some());
  }

  #[tokio::test(start_paused = true)]
  async fn test_put_resets_stored_at() {
    let store = CacheStore::new();
    let k = key("a_x");
    store.put(&k, json!(1), Duration::from_secs(10));
    tokio::time::advance(Duration::from_secs(8)).await;
    store.put(&k, json!(2), Duration::from_secs(10));
    tokio::time::advance(Duration::from_secs(8)).await;

    let hit = store.get(&k).unwrap();
    assert!(hit.fresh);
    assert_eq!(hit.value, json!(2));
  }

  #[tokio::test(start_paused = true)]
  async fn test_prefix_invalidation() {
    let store = CacheStore::new();
    store.put(&key("a_x"), json!("x"), Duration::from_secs(60));
    store.put(&key("a_y"), json!("y"), Duration::from_secs(60));
    store.put(&key("b_z"), json!("z"), Duration::from_secs(60));
    tokio::time::advance(Duration::from_secs(30)).await;

    assert_eq!(store.invalidate_prefix("a_"), 2);
    assert!(store.get(&key("a_x")).is_none());
    assert!(store.get(&key("a_y")).is_none());

    let survivor = store.get(&key("b_z")).unwrap();
    assert_eq!(survivor.value, json!("z"));
    assert!(survivor.fresh);

    // Original stored_at is kept: expires at 60s, not 90s
    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(!store.get(&key("b_z")).unwrap().fresh);
  }

  #[test]
  fn test_invalidate_missing_is_noop() {
    let store = CacheStore::new();
    assert!(!store.invalidate_key(&key("nope")));
    assert_eq!(store.invalidate_prefix("nope"), 0);
    assert_eq!(store.clear(), 0);
  }

  #[test]
  fn test_exact_invalidation_keeps_longer_keys() {
    let store = CacheStore::new();
    store.put(&key("a_x"), json!(1), Duration::from_secs(60));
    store.put(&key("a_xy"), json!(2), Duration::from_secs(60));

    assert!(store.invalidate_key(&key("a_x")));
    assert!(store.get(&key("a_xy")).is_some());
  }

  #[test]
  fn test_clear() {
    let store = CacheStore::new();
    store.put(&key("a"), json!(1), Duration::from_secs(60));
    store.put(&key("b"), json!(2), Duration::from_secs(60));
    assert_eq!(store.clear(), 2);
    assert_eq!(store.stats(), CacheStats::default());
  }

  #[tokio::test(start_paused = true)]
  async fn test_fetch_shared_runs_once() {
    let store = CacheStore::new();
    let calls = Arc::new(AtomicU32::new(0));
    let k = key("group_getSessions_{}");

    let make = |calls: Arc<AtomicU32>| {
      move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok::<_, FetchError>(json!(["S1"]))
      }
    };

    let first = store.fetch_shared(&k, Duration::from_secs(60), make(calls.clone()));
    let second = store.fetch_shared(&k, Duration::from_secs(60), make(calls.clone()));
    assert!(store.is_fetching(&k));

    let (a, b) = tokio::join!(first, second);
    assert_eq!(a.unwrap(), json!(["S1"]));
    assert_eq!(b.unwrap(), json!(["S1"]));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert!(!store.is_fetching(&k));
    assert_eq!(store.get(&k).unwrap().value, json!(["S1"]));
  }

  #[tokio::test(start_paused = true)]
  async fn test_fetch_failure_leaves_entry_untouched() {
    let store = CacheStore::new();
    let k = key("a_x");
    store.put(&k, json!("v1"), Duration::from_secs(60));
    tokio::time::advance(Duration::from_secs(20)).await;

    let result = store
      .fetch_shared(&k, Duration::from_secs(60), || async {
        Err::<Value, _>(FetchError::from("offline"))
      })
      .await;
    assert!(result.is_err());

    assert_eq!(store.get(&k).unwrap().value, json!("v1"));
    tokio::time::advance(Duration::from_secs(40)).await;
    assert!(!store.get(&k).unwrap().fresh);
    assert!(!store.is_fetching(&k));
  }

  #[tokio::test(start_paused = true)]
  async fn test_fetch_completes_without_waiters() {
    let store = CacheStore::new();
    let k = key("a_x");

    let fetch = store.fetch_shared(&k, Duration::from_secs(60), || async {
      tokio::time::sleep(Duration::from_millis(50)).await;
      Ok::<_, FetchError>(json!(42))
    });
    drop(fetch);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.get(&k).unwrap().value, json!(42));
  }

  #[tokio::test]
  async fn test_panicking_fetch_is_reported() {
    let store = CacheStore::new();
    let k = key("a_x");

    let result = store
      .fetch_shared(&k, Duration::from_secs(60), || async {
        if true {
          panic!("boom");
        }
        Ok::<_, FetchError>(json!(null))
      })
      .await;

    assert!(matches!(result, Err(FetchError::Aborted(_))));
    assert!(!store.is_fetching(&k));
  }

  #[tokio::test(start_paused = true)]
  async fn test_stats_and_summary() {
    let store = CacheStore::new();
    store.put(&key("b"), json!(1), Duration::from_secs(10));
    store.put(&key("a"), json!(2), Duration::from_secs(100));
    tokio::time::advance(Duration::from_secs(20)).await;

    let stats = store.stats();
    assert_eq!(stats.entries, 2);
    assert_eq!(stats.fresh, 1);
    assert_eq!(stats.in_flight, 0);

    let rows = store.summary();
    assert_eq!(rows[0].key.as_str(), "a");
    assert!(rows[0].fresh);
    assert!(!rows[1].fresh);
  }
}
