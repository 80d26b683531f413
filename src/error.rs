//! Error types for the cache and query layers.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A failure while fetching or decoding a cached value.
///
/// Cloneable so that every caller waiting on one shared fetch observes the
/// same outcome.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
  #[error("Fetch failed: {0}")]
  Failed(Arc<dyn std::error::Error + Send + Sync>),

  #[error("{0}")]
  Message(String),

  #[error("Fetch timed out after {0:?}")]
  Timeout(Duration),

  #[error("Failed to encode value for {key}: {reason}")]
  Encode { key: String, reason: String },

  #[error("Cached value for {key} has an unexpected shape: {reason}")]
  Decode { key: String, reason: String },

  #[error("Fetch task ended without a result: {0}")]
  Aborted(String),
}

impl FetchError {
  /// Wrap any error returned by a domain fetch function.
  pub fn new<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    FetchError::Failed(Arc::new(err))
  }

  pub fn is_timeout(&self) -> bool {
    matches!(self, FetchError::Timeout(_))
  }
}

impl From<String> for FetchError {
  fn from(msg: String) -> Self {
    FetchError::Message(msg)
  }
}

impl From<&str> for FetchError {
  fn from(msg: &str) -> Self {
    FetchError::Message(msg.to_string())
  }
}

/// Wiring mistakes while building a cache key. Not recoverable at runtime.
#[derive(Error, Debug)]
pub enum KeyError {
  #[error("Cache key needs a service identifier")]
  EmptyService,

  #[error("Cache key needs a method identifier")]
  EmptyMethod,

  #[error("Cache key cannot be empty")]
  Empty,

  #[error("Failed to serialize key parameters: {0}")]
  Params(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_message_conversion() {
    let err: FetchError = "network down".into();
    assert_eq!(err.to_string(), "network down");
    assert!(!err.is_timeout());
  }

  #[test]
  fn test_wrapped_error_keeps_source_text() {
    let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
    let err = FetchError::new(io);
    assert_eq!(err.to_string(), "Fetch failed: reset by peer");

    // Clones share the wrapped source
    let clone = err.clone();
    assert_eq!(clone.to_string(), err.to_string());
  }

  #[test]
  fn test_timeout_display() {
    let err = FetchError::Timeout(Duration::from_secs(30));
    assert!(err.is_timeout());
    assert_eq!(err.to_string(), "Fetch timed out after 30s");
  }
}
