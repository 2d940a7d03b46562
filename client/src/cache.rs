use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Profile,
    Tasks,
    Task(String),
    Users,
    User(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryFamily {
    Profile,
    Tasks,
    Users,
}

impl QueryKey {
    pub fn family(&self) -> QueryFamily {
        match self {
            QueryKey::Profile => QueryFamily::Profile,
            QueryKey::Tasks | QueryKey::Task(_) => QueryFamily::Tasks,
            QueryKey::Users | QueryKey::User(_) => QueryFamily::Users,
        }
    }

    pub fn stale_after(&self) -> Duration {
        match self {
            QueryKey::Profile => Duration::from_secs(5 * 60),
            QueryKey::Users => Duration::from_secs(60),
            QueryKey::Tasks | QueryKey::Task(_) | QueryKey::User(_) => Duration::from_secs(30),
        }
    }
}

struct Entry {
    value: serde_json::Value,
    epoch: u64,
    fetched_at: Instant,
}

/// Server-derived data kept between calls. Every entry remembers the session
/// epoch it was fetched under and is invisible to any other epoch.
#[derive(Default)]
pub struct QueryCache {
    entries: Mutex<HashMap<QueryKey, Entry>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &QueryKey, epoch: u64) -> Option<T> {
        let entries = self.entries.lock();
        let entry = entries.get(key)?;
        if entry.epoch != epoch || entry.fetched_at.elapsed() >= key.stale_after() {
            return None;
        }
        match serde_json::from_value(entry.value.clone()) {
            Ok(value) => {
                debug!(?key, "Cache hit");
                Some(value)
            }
            Err(error) => {
                warn!(?key, %error, "Cached value has an unexpected shape");
                None
            }
        }
    }

    pub fn insert<T: Serialize>(&self, key: QueryKey, value: &T, epoch: u64) {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.entries.lock().insert(
                    key,
                    Entry {
                        value,
                        epoch,
                        fetched_at: Instant::now(),
                    },
                );
            }
            Err(error) => warn!(?key, %error, "Fail to cache value"),
        }
    }

    pub fn invalidate(&self, key: &QueryKey) {
        self.entries.lock().remove(key);
    }

    pub fn invalidate_family(&self, family: QueryFamily) {
        self.entries.lock().retain(|key, _| key.family() != family);
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        debug!(entries = entries.len(), "Clearing query cache");
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
