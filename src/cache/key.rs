//! Deterministic cache keys for remote requests.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::KeyError;

/// Parameter payloads longer than this are replaced by their digest.
const MAX_INLINE_PARAMS: usize = 256;

/// Identity of one logical request: `{service}_{method}_{params}`.
///
/// Parameters are rendered as canonical JSON (object keys sorted at every
/// depth), so the same request always yields byte-identical keys no matter
/// how the caller ordered its fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
  /// Build a key from service, method and any serializable parameter set.
  pub fn build<P>(service: &str, method: &str, params: &P) -> Result<Self, KeyError>
  where
    P: Serialize + ?Sized,
  {
    if service.trim().is_empty() {
      return Err(KeyError::EmptyService);
    }
    if method.trim().is_empty() {
      return Err(KeyError::EmptyMethod);
    }

    let value = serde_json::to_value(params)?;
    let mut rendered = String::new();
    write_canonical(&value, &mut rendered);

    if rendered.len() > MAX_INLINE_PARAMS {
      // SHA256 hash for stable, fixed-length keys
      let mut hasher = Sha256::new();
      hasher.update(rendered.as_bytes());
      rendered = format!("#{}", hex::encode(hasher.finalize()));
    }

    Ok(Self(format!("{}{}", Self::method_prefix(service, method), rendered)))
  }

  /// Wrap an already-built key string.
  pub fn from_raw(raw: impl Into<String>) -> Result<Self, KeyError> {
    let raw = raw.into();
    if raw.is_empty() {
      return Err(KeyError::Empty);
    }
    Ok(Self(raw))
  }

  /// Prefix matching every key of a service.
  pub fn service_prefix(service: &str) -> String {
    format!("{}_", service)
  }

  /// Prefix matching every key of one service method.
  pub fn method_prefix(service: &str, method: &str) -> String {
    format!("{}_{}_", service, method)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn starts_with(&self, prefix: &str) -> bool {
    self.0.starts_with(prefix)
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl AsRef<str> for CacheKey {
  fn as_ref(&self) -> &str {
    &self.0
  }
}

/// Render JSON with object keys sorted, independent of map ordering features.
fn write_canonical(value: &Value, out: &mut String) {
  match value {
    Value::Object(map) => {
      let mut entries: Vec<_> = map.iter().collect();
      entries.sort_by(|a, b| a.0.cmp(b.0));
      out.push('{');
      for (i, (k, v)) in entries.into_iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        // Serializing a string cannot fail
        out.push_str(&Value::String(k.clone()).to_string());
        out.push(':');
        write_canonical(v, out);
      }
      out.push('}');
    }
    Value::Array(items) => {
      out.push('[');
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_canonical(item, out);
      }
      out.push(']');
    }
    scalar => out.push_str(&scalar.to_string()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_key_format() {
    let key = CacheKey::build("teacher", "getTeacherGroups", &json!({"teacherId": "T1"})).unwrap();
    assert_eq!(key.as_str(), r#"teacher_getTeacherGroups_{"teacherId":"T1"}"#);
  }

  #[test]
  fn test_field_order_does_not_matter() {
    let a = CacheKey::build("group", "getSessions", &json!({"groupId": "G1", "month": 3})).unwrap();
    let b = CacheKey::build("group", "getSessions", &json!({"month": 3, "groupId": "G1"})).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn test_nested_objects_are_sorted() {
    let key = CacheKey::build("s", "m", &json!({"b": {"z": 1, "a": [ {"y": 2, "x": 1} ]}, "a": null}))
      .unwrap();
    assert_eq!(key.as_str(), r#"s_m_{"a":null,"b":{"a":[{"x":1,"y":2}],"z":1}}"#);
  }

  #[test]
  fn test_different_params_differ() {
    let a = CacheKey::build("teacher", "getTeacherGroups", &json!({"teacherId": "T1"})).unwrap();
    let b = CacheKey::build("teacher", "getTeacherGroups", &json!({"teacherId": "T2"})).unwrap();
    assert_ne!(a, b);
  }

  #[test]
  fn test_long_params_are_hashed() {
    let ids: Vec<String> = (0..100).map(|i| format!("student-{}", i)).collect();
    let key = CacheKey::build("admin", "getStudents", &json!({ "ids": ids })).unwrap();

    let prefix = CacheKey::method_prefix("admin", "getStudents");
    assert!(key.starts_with(&prefix));
    let rest = &key.as_str()[prefix.len()..];
    assert!(rest.starts_with('#'));
    assert_eq!(rest.len(), 1 + 64);

    let again = CacheKey::build("admin", "getStudents", &json!({ "ids": ids })).unwrap();
    assert_eq!(key, again);
  }

  #[test]
  fn test_prefixes_match_built_keys() {
    let key = CacheKey::build("student", "getProfile", &json!({"id": 7})).unwrap();
    assert!(key.starts_with(&CacheKey::service_prefix("student")));
    assert!(key.starts_with(&CacheKey::method_prefix("student", "getProfile")));
    assert!(!key.starts_with(&CacheKey::service_prefix("teacher")));
  }

  #[test]
  fn test_empty_identifiers_rejected() {
    assert!(matches!(CacheKey::build("", "m", &()), Err(KeyError::EmptyService)));
    assert!(matches!(CacheKey::build("s", "  ", &()), Err(KeyError::EmptyMethod)));
    assert!(matches!(CacheKey::from_raw(""), Err(KeyError::Empty)));
  }
}
