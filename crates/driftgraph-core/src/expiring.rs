//! Owned key/value store with time-based expiry.
//!
//! Time comes from an injected [`Clock`] so tests can drive expiry without
//! sleeping, and entries only disappear on read or on an explicit
//! [`ExpiringStore::sweep_expired`] call.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

pub struct ExpiringStore<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<K, V> std::fmt::Debug for ExpiringStore<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringStore")
            .field("len", &self.entries.lock().len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl<K, V> ExpiringStore<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.entries.lock().insert(key, Entry { value, expires_at });
    }

    /// Returns a live value; an expired entry is dropped on the way out.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.lock().remove(key).map(|e| e.value)
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(clock: &ManualClock) -> ExpiringStore<String, u32> {
        ExpiringStore::new(Duration::seconds(60), Arc::new(clock.clone()))
    }

    #[test]
    fn entries_expire_with_the_injected_clock() {
        let clock = ManualClock::new(Utc::now());
        let s = store(&clock);
        s.insert("a".into(), 1);
        clock.advance(Duration::seconds(59));
        assert_eq!(s.get(&"a".to_string()), Some(1));
        clock.advance(Duration::seconds(1));
        assert_eq!(s.get(&"a".to_string()), None);
        assert!(s.is_empty());
    }

    #[test]
    fn sweep_removes_only_expired() {
        let clock = ManualClock::new(Utc::now());
        let s = store(&clock);
        s.insert("old".into(), 1);
        clock.advance(Duration::seconds(30));
        s.insert("new".into(), 2);
        clock.advance(Duration::seconds(31));
        assert_eq!(s.sweep_expired(), 1);
        assert_eq!(s.len(), 1);
        assert_eq!(s.get(&"new".to_string()), Some(2));
    }

    #[test]
    fn oversized_ttl_never_expires() {
        let clock = ManualClock::new(Utc::now());
        let s = ExpiringStore::new(Duration::MAX, Arc::new(clock.clone()));
        s.insert("a".to_string(), 1u32);
        clock.advance(Duration::days(365 * 1000));
        assert_eq!(s.get(&"a".to_string()), Some(1));
        assert_eq!(s.sweep_expired(), 0);
    }
}
