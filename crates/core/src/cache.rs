//! Read cache
//!
//! Keyed snapshots of previously fetched data. The fetch path and the
//! reconciler are the only writers; views read and re-render on
//! [`CacheEvent`]s.

use crate::scope::{DoctorId, SCOPE_DATE_FORMAT};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::broadcast;

/// One segment of a cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    Int(i64),
    Str(String),
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        KeyPart::Str(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        KeyPart::Str(s)
    }
}

impl From<i64> for KeyPart {
    fn from(n: i64) -> Self {
        KeyPart::Int(n)
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Int(n) => write!(f, "{}", n),
            KeyPart::Str(s) => write!(f, "{}", s),
        }
    }
}

/// Query key, e.g. `["schedules", 12, "2025-03-10"]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(pub Vec<KeyPart>);

impl CacheKey {
    pub fn new<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<KeyPart>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    pub fn schedules(doctor_id: DoctorId, date: NaiveDate) -> Self {
        Self(vec![
            KeyPart::from("schedules"),
            KeyPart::Int(doctor_id),
            KeyPart::Str(date.format(SCOPE_DATE_FORMAT).to_string()),
        ])
    }

    pub fn upcoming_appointments() -> Self {
        Self::new(["appointments", "upcoming"])
    }

    pub fn todays_appointments() -> Self {
        Self::new(["appointments", "today"])
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match part {
                KeyPart::Int(n) => write!(f, "{}", n)?,
                KeyPart::Str(s) => write!(f, "\"{}\"", s)?,
            }
        }
        write!(f, "]")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: JsonValue,
    /// Set when the entry must be refetched before it is trusted again
    pub stale: bool,
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn fresh(value: JsonValue) -> Self {
        Self {
            value,
            stale: false,
            updated_at: Utc::now(),
        }
    }
}

/// Change notifications for views reading the cache
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    Updated(CacheKey),
    Stale(CacheKey),
}

/// Read-cache collaborator interface
pub trait ReadCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry>;
    fn set(&self, key: CacheKey, value: JsonValue);
    fn mark_stale(&self, key: &CacheKey);
}

/// In-process read cache
pub struct MemoryCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    events: broadcast::Sender<CacheEvent>,
}

impl MemoryCache {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            entries: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        self.entries.read().keys().cloned().collect()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadCache for MemoryCache {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: CacheKey, value: JsonValue) {
        self.entries
            .write()
            .insert(key.clone(), CacheEntry::fresh(value));
        // No receivers is the normal headless case
        let _ = self.events.send(CacheEvent::Updated(key));
    }

    fn mark_stale(&self, key: &CacheKey) {
        let marked = match self.entries.write().get_mut(key) {
            Some(entry) => {
                entry.stale = true;
                true
            }
            None => false,
        };
        if marked {
            let _ = self.events.send(CacheEvent::Stale(key.clone()));
        } else {
            tracing::debug!("mark_stale on absent key {}", key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schedules_key_shape() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let key = CacheKey::schedules(12, date);
        assert_eq!(
            serde_json::to_value(&key).unwrap(),
            json!(["schedules", 12, "2025-03-10"])
        );
        assert_eq!(key.to_string(), "[\"schedules\", 12, \"2025-03-10\"]");
    }

    #[test]
    fn test_schedules_key_matches_topic_for_large_ids() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let scope = crate::scope::Scope::slots(i64::MAX, date);
        let key = scope.fetch_key().unwrap();
        assert_eq!(key.parts()[1], KeyPart::Int(i64::MAX));
        assert_eq!(
            scope.topic(),
            format!("/topic/slots/{}/2025-03-10", i64::MAX)
        );
        // ids past i64 never become a scope, so no key can wrap negative
        assert!(crate::scope::Scope::from_topic("/topic/slots/18446744073709551615/2025-03-10")
            .is_err());
    }

    #[test]
    fn test_set_get_and_events() {
        let cache = MemoryCache::new();
        let mut rx = cache.subscribe();
        let key = CacheKey::upcoming_appointments();

        cache.set(key.clone(), json!([1, 2]));
        assert_eq!(cache.get(&key).unwrap().value, json!([1, 2]));
        assert_eq!(rx.try_recv().unwrap(), CacheEvent::Updated(key.clone()));

        cache.mark_stale(&key);
        assert!(cache.get(&key).unwrap().stale);
        assert_eq!(rx.try_recv().unwrap(), CacheEvent::Stale(key));
    }

    #[test]
    fn test_set_clears_stale_flag() {
        let cache = MemoryCache::new();
        let key = CacheKey::todays_appointments();
        cache.set(key.clone(), json!([]));
        cache.mark_stale(&key);
        cache.set(key.clone(), json!([1]));
        assert!(!cache.get(&key).unwrap().stale);
    }

    #[test]
    fn test_mark_stale_on_missing_key_is_silent() {
        let cache = MemoryCache::new();
        let mut rx = cache.subscribe();
        cache.mark_stale(&CacheKey::todays_appointments());
        assert!(rx.try_recv().is_err());
        assert!(cache.is_empty());
    }
}
