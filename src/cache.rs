//! Freshness of fetched remote data.
//!
//! Each remote source (weather, calendar) owns one [`Poller`]: the last good
//! snapshot plus the time of the next attempt. Polling runs at a fixed period;
//! a failed attempt keeps the snapshot and waits a full period like a
//! successful one.

use crate::error::StorageError;
use crate::storage::KeyValueStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const MINUTE_MS: i64 = 60 * 1000;
pub const WEATHER_TTL_MS: i64 = 30 * MINUTE_MS;
pub const CALENDAR_TTL_MS: i64 = 7 * MINUTE_MS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cached<T> {
    #[serde(flatten)]
    pub payload: T,
    #[serde(rename = "fetchedAt")]
    pub fetched_at: i64,
}

impl<T> Cached<T> {
    pub fn new(payload: T, fetched_at: i64) -> Self {
        Cached {
            payload,
            fetched_at,
        }
    }

    pub fn age(&self, now_ms: i64) -> i64 {
        now_ms - self.fetched_at
    }
}

pub fn is_fresh<T>(entry: Option<&Cached<T>>, ttl_ms: i64, now_ms: i64) -> bool {
    entry.map(|e| e.age(now_ms) < ttl_ms).unwrap_or(false)
}

/// Reads a cache entry; anything that does not decode (including a missing
/// or non-numeric `fetchedAt`) counts as absent.
pub fn load_cached<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<Cached<T>> {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(err) => {
            warn!(key, error = %err, "cache unreadable");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(entry) => Some(entry),
        Err(err) => {
            debug!(key, error = %err, "ignoring malformed cache entry");
            None
        }
    }
}

pub fn save_cached<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    entry: &Cached<T>,
) -> Result<(), StorageError> {
    let encoded = serde_json::to_string(entry).map_err(|source| StorageError::Encode {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &encoded)
}

#[derive(Debug, Clone)]
pub struct Poller<T> {
    ttl_ms: i64,
    next_due: i64,
    in_flight: bool,
    /// A force that arrived while an attempt was running.
    force_pending: bool,
    snapshot: Option<Cached<T>>,
}

impl<T: Clone> Poller<T> {
    pub fn new(ttl_ms: i64) -> Self {
        Poller {
            ttl_ms,
            next_due: i64::MIN,
            in_flight: false,
            force_pending: false,
            snapshot: None,
        }
    }

    /// Starts from whatever the cache holds. A fresh entry pushes the first
    /// poll out by its remaining lifetime rather than a whole period.
    pub fn seed(&mut self, cached: Option<Cached<T>>, now_ms: i64) {
        self.next_due = match &cached {
            Some(entry) if is_fresh(Some(entry), self.ttl_ms, now_ms) => {
                entry.fetched_at + self.ttl_ms
            }
            _ => now_ms,
        };
        self.snapshot = cached;
    }

    pub fn snapshot(&self) -> Option<&Cached<T>> {
        self.snapshot.as_ref()
    }

    pub fn next_due(&self) -> i64 {
        self.next_due
    }

    /// Claims the next attempt if one is due and none is running.
    pub fn take_due(&mut self, now_ms: i64) -> bool {
        if self.in_flight || now_ms < self.next_due {
            return false;
        }
        self.in_flight = true;
        true
    }

    /// Makes the next poll due now. While an attempt is running the force
    /// is held until that attempt completes.
    pub fn force(&mut self) {
        if self.in_flight {
            self.force_pending = true;
        } else {
            self.next_due = i64::MIN;
        }
    }

    /// Records the outcome of an attempt. Returns the new snapshot on
    /// success so the caller can persist and render it.
    pub fn complete<E>(&mut self, result: Result<T, E>, now_ms: i64) -> Option<&Cached<T>> {
        self.in_flight = false;
        self.next_due = if self.force_pending {
            now_ms
        } else {
            now_ms + self.ttl_ms
        };
        self.force_pending = false;
        match result {
            Ok(payload) => {
                self.snapshot = Some(Cached::new(payload, now_ms));
                self.snapshot.as_ref()
            }
            Err(_) => None,
        }
    }
}

/// One synchronous pass of the gate: fetch when stale (or forced), persist on
/// success, and return whatever snapshot is best afterwards.
pub fn refresh_blocking<T, E, F>(
    store: &dyn KeyValueStore,
    key: &str,
    ttl_ms: i64,
    now_ms: i64,
    force: bool,
    fetch: F,
) -> Option<Cached<T>>
where
    T: Clone + Serialize + DeserializeOwned,
    E: std::fmt::Display,
    F: FnOnce() -> Result<T, E>,
{
    let mut poller = Poller::new(ttl_ms);
    poller.seed(load_cached(store, key), now_ms);
    if force {
        poller.force();
    }
    if poller.take_due(now_ms) {
        let result = fetch();
        if let Err(err) = &result {
            warn!(key, error = %err, "fetch failed, keeping last snapshot");
        }
        if let Some(entry) = poller.complete(result, now_ms) {
            if let Err(err) = save_cached(store, key, entry) {
                warn!(key, error = %err, "could not persist cache entry");
            }
        }
    }
    poller.snapshot().cloned()
}
