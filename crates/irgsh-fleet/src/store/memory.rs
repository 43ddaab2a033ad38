//! In-process fleet store.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use super::{Batch, BatchOp, FleetStore};
use crate::FleetResult;

#[derive(Default)]
struct State {
    values: HashMap<String, (String, Instant)>,
    sets: HashMap<String, BTreeSet<String>>,
}

impl State {
    fn live_value(&self, key: &str, now: Instant) -> Option<&String> {
        self.values
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value)
    }
}

/// Fleet store kept in process memory.
///
/// Expired values are dropped lazily on access. Batches run under one
/// lock, so they are atomic with respect to every other call.
#[derive(Default)]
pub struct MemoryFleetStore {
    state: Mutex<State>,
}

impl MemoryFleetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a value as if its TTL had run out.
    pub fn expire(&self, key: &str) {
        self.lock().values.remove(key);
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl FleetStore for MemoryFleetStore {
    async fn get(&self, key: &str) -> FleetResult<Option<String>> {
        let now = Instant::now();
        let mut state = self.lock();
        let value = state.live_value(key, now).cloned();
        if value.is_none() {
            state.values.remove(key);
        }
        Ok(value)
    }

    async fn members(&self, key: &str) -> FleetResult<Vec<String>> {
        Ok(self
            .lock()
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn apply(&self, batch: Batch) -> FleetResult<bool> {
        let now = Instant::now();
        let mut state = self.lock();
        let guards_hold = batch
            .guards
            .iter()
            .all(|guard| guard.holds(state.live_value(&guard.key, now).map(String::as_str)));
        if !guards_hold {
            return Ok(false);
        }

        for op in batch.ops {
            match op {
                BatchOp::Set { key, value, ttl } => {
                    state.values.insert(key, (value, now + ttl));
                }
                BatchOp::Delete { key } => {
                    state.values.remove(&key);
                    state.sets.remove(&key);
                }
                BatchOp::SetAdd { key, member } => {
                    state.sets.entry(key).or_default().insert(member);
                }
                BatchOp::SetRemove { key, member } => {
                    if let Some(set) = state.sets.get_mut(&key) {
                        set.remove(&member);
                        if set.is_empty() {
                            state.sets.remove(&key);
                        }
                    }
                }
            }
        }
        Ok(true)
    }

    async fn count_keys(&self, prefix: &str) -> FleetResult<usize> {
        let now = Instant::now();
        let state = self.lock();
        let values = state
            .values
            .iter()
            .filter(|(key, (_, expires_at))| key.starts_with(prefix) && *expires_at > now)
            .count();
        let sets = state.sets.keys().filter(|key| key.starts_with(prefix)).count();
        Ok(values + sets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_set_get_and_expiry() {
        let store = MemoryFleetStore::new();
        let mut batch = Batch::new();
        batch.set("a", "1", Duration::from_secs(60));
        batch.set("b", "2", Duration::ZERO);
        store.apply(batch).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(store.get("b").await.unwrap(), None);

        store.expire("a");
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sets() {
        let store = MemoryFleetStore::new();
        let mut batch = Batch::new();
        batch.set_add("s", "x").set_add("s", "y").set_add("s", "x");
        store.apply(batch).await.unwrap();
        assert_eq!(store.members("s").await.unwrap(), vec!["x", "y"]);

        let mut batch = Batch::new();
        batch.set_remove("s", "x").set_remove("missing", "x");
        store.apply(batch).await.unwrap();
        assert_eq!(store.members("s").await.unwrap(), vec!["y"]);
        assert!(store.members("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_guarded_batch() {
        let store = MemoryFleetStore::new();
        let mut batch = Batch::new();
        batch.set("a", "1", Duration::from_secs(60));
        store.apply(batch).await.unwrap();

        let mut stale = Batch::new();
        stale.require("a", Some("0".to_string())).delete("a");
        assert!(!store.apply(stale).await.unwrap());
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));

        let mut absent = Batch::new();
        absent.require("a", None).set_add("s", "x");
        assert!(!store.apply(absent).await.unwrap());
        assert!(store.members("s").await.unwrap().is_empty());

        let mut current = Batch::new();
        current.require("a", Some("1".to_string())).delete("a");
        assert!(store.apply(current).await.unwrap());
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_count_keys_by_prefix() {
        let store = MemoryFleetStore::new();
        let mut batch = Batch::new();
        batch
            .set("instance:a", "1", Duration::from_secs(60))
            .set("instance:b", "1", Duration::ZERO)
            .set("other", "1", Duration::from_secs(60))
            .set_add("instance:index", "a");
        store.apply(batch).await.unwrap();

        assert_eq!(store.count_keys("instance:").await.unwrap(), 2);
    }
}
