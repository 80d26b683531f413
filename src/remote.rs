use portal_cache::CacheKey;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RemoteError {
  #[error("remote store unavailable")]
  Unavailable,

  #[error("no document at {0}")]
  NotFound(String),
}

/// In-process stand-in for the portal's document database.
///
/// Documents are addressed by the same key the cache uses. Every read waits
/// `latency` and can be made to fail, so cache behaviour is visible from the
/// shell.
#[derive(Clone)]
pub struct RemoteStore {
  inner: Arc<RemoteInner>,
}

struct RemoteInner {
  documents: Mutex<HashMap<CacheKey, Value>>,
  latency: Duration,
  failing: AtomicBool,
  reads: AtomicU64,
}

impl RemoteStore {
  pub fn new(latency: Duration) -> Self {
    Self {
      inner: Arc::new(RemoteInner {
        documents: Mutex::new(HashMap::new()),
        latency,
        failing: AtomicBool::new(false),
        reads: AtomicU64::new(0),
      }),
    }
  }

  /// A store holding a few portal documents to play with.
  pub fn seeded(latency: Duration) -> Self {
    let store = Self::new(latency);
    let seed = [
      (
        "teacher",
        "getTeacherGroups",
        json!({"teacherId": "T1"}),
        json!(["G1", "G2"]),
      ),
      (
        "group",
        "getGroupMembers",
        json!({"groupId": "G1"}),
        json!(["S1", "S2", "S3"]),
      ),
      (
        "student",
        "getGrades",
        json!({"studentId": "S1"}),
        json!([{"course": "Math", "grade": "A"}, {"course": "History", "grade": "B"}]),
      ),
      (
        "student",
        "getProfile",
        json!({"studentId": "S1"}),
        json!({"name": "Ada", "groupId": "G1"}),
      ),
    ];
    for (service, method, params, value) in seed {
      if let Ok(key) = CacheKey::build(service, method, &params) {
        store.write(key, value);
      }
    }
    store
  }

  pub async fn read(&self, key: &CacheKey) -> Result<Value, RemoteError> {
    self.inner.reads.fetch_add(1, Ordering::SeqCst);
    debug!(key = %key, "Remote read");
    tokio::time::sleep(self.inner.latency).await;

    if self.is_failing() {
      return Err(RemoteError::Unavailable);
    }
    self
      .documents()
      .get(key)
      .cloned()
      .ok_or_else(|| RemoteError::NotFound(key.to_string()))
  }

  /// Replace a document. Cached copies are not told.
  pub fn write(&self, key: CacheKey, value: Value) {
    self.documents().insert(key, value);
  }

  pub fn set_failing(&self, failing: bool) {
    self.inner.failing.store(failing, Ordering::SeqCst);
  }

  pub fn is_failing(&self) -> bool {
    self.inner.failing.load(Ordering::SeqCst)
  }

  /// Reads issued so far, including failed ones
  pub fn reads(&self) -> u64 {
    self.inner.reads.load(Ordering::SeqCst)
  }

  pub fn len(&self) -> usize {
    self.documents().len()
  }

  pub fn is_empty(&self) -> bool {
    self.documents().is_empty()
  }

  fn documents(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, Value>> {
    self
      .inner
      .documents
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn groups_key() -> CacheKey {
    CacheKey::build("teacher", "getTeacherGroups", &json!({"teacherId": "T1"})).unwrap()
  }

  #[tokio::test(start_paused = true)]
  async fn test_seeded_documents() {
    let remote = RemoteStore::seeded(Duration::from_millis(50));
    assert_eq!(remote.len(), 4);
    assert!(!remote.is_empty());
    assert_eq!(remote.read(&groups_key()).await.unwrap(), json!(["G1", "G2"]));
    assert_eq!(remote.reads(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_read_waits_for_latency() {
    let remote = RemoteStore::seeded(Duration::from_millis(400));
    let started = tokio::time::Instant::now();
    remote.read(&groups_key()).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(400));
  }

  #[tokio::test(start_paused = true)]
  async fn test_missing_document() {
    let remote = RemoteStore::new(Duration::ZERO);
    assert!(remote.is_empty());
    let err = remote.read(&groups_key()).await.unwrap_err();
    assert!(matches!(err, RemoteError::NotFound(_)));
  }

  #[tokio::test(start_paused = true)]
  async fn test_failing_store() {
    let remote = RemoteStore::seeded(Duration::ZERO);
    remote.set_failing(true);
    assert!(matches!(
      remote.read(&groups_key()).await,
      Err(RemoteError::Unavailable)
    ));
    assert_eq!(remote.reads(), 1);

    remote.set_failing(false);
    remote.write(groups_key(), json!(["G3"]));
    assert_eq!(remote.read(&groups_key()).await.unwrap(), json!(["G3"]));
  }
}
