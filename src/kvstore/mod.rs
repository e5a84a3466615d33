//! Key-value store abstraction.
//!
//! A small capability surface — ordered sets, hashes, strings, and atomic
//! multi-op transactions — that the purchase cache and event queue build
//! on. It exists so those two layers can be exercised against an
//! in-memory fake instead of a live Redis instance in tests.

pub mod error;
pub mod memory_store;
pub mod redis_store;

pub use error::StoreError;
pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;

/// One operation inside an atomic [`KeyValueStore::transaction`] batch.
#[derive(Debug, Clone)]
pub enum TxOp {
    ZAdd {
        key: String,
        score: f64,
        member: String,
    },
    ZRem {
        key: String,
        member: String,
    },
    HSet {
        key: String,
        field: String,
        value: String,
    },
    HDel {
        key: String,
        field: String,
    },
    Set {
        key: String,
        value: String,
    },
    Del {
        key: String,
    },
    Incr {
        key: String,
    },
}

/// Per-op result of a [`KeyValueStore::transaction`] batch, in the same
/// order as the submitted [`TxOp`]s.
#[derive(Debug, Clone, PartialEq)]
pub enum TxResult {
    Added(bool),
    Removed(bool),
    /// `true` iff the hash field did not exist before this `HSet`.
    HashSet(bool),
    Ok,
    Incremented(i64),
}

/// The full key-value capability surface required by C2 (purchase cache)
/// and C3 (event queue). Implemented against Redis in production and an
/// in-memory, mutex-guarded fake in tests.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    // ---- Ordered set<string> with numeric score ----
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<bool, StoreError>;
    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError>;
    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    /// Index range `[lo, hi]` inclusive, ordered by ascending score (lowest first).
    async fn zrange_by_index(&self, key: &str, lo: isize, hi: isize)
    -> Result<Vec<String>, StoreError>;
    async fn zrange_by_score(
        &self,
        key: &str,
        min_score: f64,
        max_score: f64,
    ) -> Result<Vec<String>, StoreError>;
    async fn zcard(&self, key: &str) -> Result<u64, StoreError>;

    // ---- Hash<string, string> ----
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;
    async fn hmget(
        &self,
        key: &str,
        fields: &[String],
    ) -> Result<Vec<Option<String>>, StoreError>;
    async fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError>;
    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, StoreError>;

    // ---- String ----
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn del(&self, key: &str) -> Result<(), StoreError>;
    async fn increment(&self, key: &str) -> Result<i64, StoreError>;

    /// Flush every key under a namespace prefix. Used by `PurchaseCache::clear`.
    async fn flush_prefix(&self, prefix: &str) -> Result<(), StoreError>;

    /// Execute a batch of [`TxOp`]s atomically with respect to other
    /// clients writing the same keys.
    async fn transaction(&self, ops: Vec<TxOp>) -> Result<Vec<TxResult>, StoreError>;

    async fn close(&self) -> Result<(), StoreError>;
}
