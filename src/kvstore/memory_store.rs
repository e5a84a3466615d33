//! In-memory [`KeyValueStore`](super::KeyValueStore) fake, modeled on the
//! `ts_store` nonce-store pattern: a handful of plain maps behind one lock,
//! good enough for deterministic tests without a live Redis. A single
//! mutex is used instead of a sharded map so that `transaction` can apply
//! a multi-key batch as one atomic step, which a per-shard lock cannot
//! guarantee across keys landing in different shards.

use super::{KeyValueStore, StoreError, TxOp, TxResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    zsets: HashMap<String, HashMap<String, f64>>,
    hashes: HashMap<String, HashMap<String, String>>,
    strings: HashMap<String, String>,
}

/// An in-process [`KeyValueStore`] backed by plain maps under a single
/// mutex. Intended for unit/integration tests, not production traffic.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted_members(set: &HashMap<String, f64>) -> Vec<(String, f64)> {
        let mut members: Vec<(String, f64)> = set.iter().map(|(m, s)| (m.clone(), *s)).collect();
        members.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then(a.0.cmp(&b.0)));
        members
    }

    fn apply(&self, inner: &mut Inner, op: &TxOp) -> TxResult {
        match op {
            TxOp::ZAdd { key, score, member } => {
                let set = inner.zsets.entry(key.clone()).or_default();
                let is_new = !set.contains_key(member);
                set.insert(member.clone(), *score);
                TxResult::Added(is_new)
            }
            TxOp::ZRem { key, member } => {
                let removed = inner
                    .zsets
                    .get_mut(key)
                    .map(|set| set.remove(member).is_some())
                    .unwrap_or(false);
                TxResult::Removed(removed)
            }
            TxOp::HSet { key, field, value } => {
                let hash = inner.hashes.entry(key.clone()).or_default();
                let is_new = !hash.contains_key(field);
                hash.insert(field.clone(), value.clone());
                TxResult::HashSet(is_new)
            }
            TxOp::HDel { key, field } => {
                let removed = inner
                    .hashes
                    .get_mut(key)
                    .map(|h| h.remove(field).is_some())
                    .unwrap_or(false);
                TxResult::Removed(removed)
            }
            TxOp::Set { key, value } => {
                inner.strings.insert(key.clone(), value.clone());
                TxResult::Ok
            }
            TxOp::Del { key } => {
                inner.strings.remove(key);
                inner.zsets.remove(key);
                inner.hashes.remove(key);
                TxResult::Ok
            }
            TxOp::Incr { key } => {
                let current = inner
                    .strings
                    .get(key)
                    .and_then(|v| v.parse::<i64>().ok())
                    .unwrap_or(0);
                let next = current + 1;
                inner.strings.insert(key.clone(), next.to_string());
                TxResult::Incremented(next)
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let set = inner.zsets.entry(key.to_string()).or_default();
        let is_new = !set.contains_key(member);
        set.insert(member.to_string(), score);
        Ok(is_new)
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.zsets.get(key).and_then(|s| s.get(member).copied()))
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner
            .zsets
            .get_mut(key)
            .map(|s| s.remove(member).is_some())
            .unwrap_or(false))
    }

    async fn zrange_by_index(
        &self,
        key: &str,
        lo: isize,
        hi: isize,
    ) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let Some(set) = inner.zsets.get(key) else {
            return Ok(Vec::new());
        };
        let members = Self::sorted_members(set);
        let len = members.len() as isize;
        let norm = |i: isize| -> isize {
            if i < 0 { (len + i).max(0) } else { i }
        };
        let lo = norm(lo).max(0);
        let hi = norm(hi).min(len - 1);
        if lo > hi || len == 0 {
            return Ok(Vec::new());
        }
        Ok(members[lo as usize..=hi as usize]
            .iter()
            .map(|(m, _)| m.clone())
            .collect())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min_score: f64,
        max_score: f64,
    ) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let Some(set) = inner.zsets.get(key) else {
            return Ok(Vec::new());
        };
        Ok(Self::sorted_members(set)
            .into_iter()
            .filter(|(_, score)| *score >= min_score && *score <= max_score)
            .map(|(m, _)| m)
            .collect())
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.zsets.get(key).map(|s| s.len() as u64).unwrap_or(0))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let hash = inner.hashes.get(key);
        Ok(fields
            .iter()
            .map(|f| hash.and_then(|h| h.get(f).cloned()))
            .collect())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner
            .hashes
            .get_mut(key)
            .map(|h| h.remove(field).is_some())
            .unwrap_or(false))
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .hashes
            .get(key)
            .map(|h| h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.strings.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.strings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.strings.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let current = inner
            .strings
            .get(key)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + 1;
        inner.strings.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn flush_prefix(&self, prefix: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.zsets.retain(|k, _| !k.starts_with(prefix));
        inner.hashes.retain(|k, _| !k.starts_with(prefix));
        inner.strings.retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }

    async fn transaction(&self, ops: Vec<TxOp>) -> Result<Vec<TxResult>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Ok(ops.iter().map(|op| self.apply(&mut inner, op)).collect())
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zrange_by_index_orders_by_score() {
        let store = MemoryStore::new();
        store.zadd("k", 20.0, "b").await.unwrap();
        store.zadd("k", 10.0, "a").await.unwrap();
        store.zadd("k", 30.0, "c").await.unwrap();
        let range = store.zrange_by_index("k", 0, 1).await.unwrap();
        assert_eq!(range, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn transaction_is_observed_atomically() {
        let store = MemoryStore::new();
        let results = store
            .transaction(vec![
                TxOp::ZAdd {
                    key: "pending".into(),
                    score: 1.0,
                    member: "ev-1".into(),
                },
                TxOp::HSet {
                    key: "data".into(),
                    field: "ev-1".into(),
                    value: "{}".into(),
                },
            ])
            .await
            .unwrap();
        assert_eq!(results[0], TxResult::Added(true));
        assert_eq!(results[1], TxResult::HashSet(true));
        assert_eq!(store.zcard("pending").await.unwrap(), 1);
    }
}
