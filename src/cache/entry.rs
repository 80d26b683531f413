//! Stored entries and lookup results.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

/// A value held by the store together with its expiry metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub value: Value,
  /// Monotonic write time, used for freshness
  pub stored_at: Instant,
  /// Wall-clock write time, shown to consumers as "last updated"
  pub updated_at: DateTime<Utc>,
  pub ttl: Duration,
}

impl CacheEntry {
  pub fn new(value: Value, ttl: Duration) -> Self {
    Self {
      value,
      stored_at: Instant::now(),
      updated_at: Utc::now(),
      ttl,
    }
  }

  pub fn age(&self) -> Duration {
    Instant::now().saturating_duration_since(self.stored_at)
  }

  /// Fresh while strictly younger than the TTL.
  pub fn is_fresh(&self) -> bool {
    self.age() < self.ttl
  }

  pub fn age_display(&self) -> String {
    age_display(self.age())
  }
}

/// Result of a store read. Stale entries are still returned, flagged.
#[derive(Debug, Clone)]
pub struct CacheLookup {
  pub value: Value,
  pub fresh: bool,
  pub updated_at: DateTime<Utc>,
}

/// Human-friendly age, rounded the way status bars show it.
pub fn age_display(age: Duration) -> String {
  let minutes = age.as_secs() / 60;
  if minutes < 1 {
    "just now".to_string()
  } else if minutes < 60 {
    format!("{}m ago", minutes)
  } else if minutes < 1440 {
    let hours = minutes / 60;
    if minutes % 60 >= 30 {
      format!("{}h ago", hours + 1)
    } else {
      format!("{}h ago", hours)
    }
  } else {
    let days = minutes / 1440;
    if (minutes % 1440) / 60 >= 12 {
      format!("{}d ago", days + 1)
    } else {
      format!("{}d ago", days)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_age_display() {
    assert_eq!(age_display(Duration::from_secs(10)), "just now");
    assert_eq!(age_display(Duration::from_secs(5 * 60)), "5m ago");
    assert_eq!(age_display(Duration::from_secs(90 * 60)), "2h ago");
    assert_eq!(age_display(Duration::from_secs(80 * 60)), "1h ago");
    assert_eq!(age_display(Duration::from_secs(36 * 3600)), "2d ago");
    assert_eq!(age_display(Duration::from_secs(30 * 3600)), "1d ago");
  }

  #[tokio::test(start_paused = true)]
  async fn test_entry_freshness_boundary() {
    let entry = CacheEntry::new(json!(1), Duration::from_secs(10));
    assert!(entry.is_fresh());

    tokio::time::advance(Duration::from_millis(9_999)).await;
    assert!(entry.is_fresh());

    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(!entry.is_fresh());
  }

  #[tokio::test(start_paused = true)]
  async fn test_zero_ttl_is_never_fresh() {
    let entry = CacheEntry::new(json!("x"), Duration::ZERO);
    assert!(!entry.is_fresh());
  }
}
