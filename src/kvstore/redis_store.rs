//! Redis-backed [`KeyValueStore`](super::KeyValueStore) — the production
//! implementation of the key-value store abstraction.

use super::{KeyValueStore, StoreError, TxOp, TxResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, from_redis_value};
use std::time::Duration;
use tracing::{info, warn};

const CONNECT_RETRY_CAP_MS: u64 = 1_000;

pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connects with retry, doubling the delay between attempts up to a
    /// ~1s cap, per the Key-Value Store Abstraction's connection contract.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, StoreError> {
        let url = format!("redis://{host}:{port}/");
        let client =
            redis::Client::open(url.clone()).map_err(|e| StoreError::Connection(e.to_string()))?;

        let mut delay = Duration::from_millis(50);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match client.get_connection_manager().await {
                Ok(conn) => {
                    info!(%url, "connected to key-value store");
                    return Ok(Self { conn });
                }
                Err(e) => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(StoreError::Connection(format!(
                            "giving up connecting to {url} after {timeout:?}: {e}"
                        )));
                    }
                    warn!(%url, error = %e, "key-value store connection failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_millis(CONNECT_RETRY_CAP_MS));
                }
            }
        }
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn build_pipeline(ops: &[TxOp]) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic();
    for op in ops {
        match op {
            TxOp::ZAdd { key, score, member } => {
                pipe.zadd(key, member, *score);
            }
            TxOp::ZRem { key, member } => {
                pipe.zrem(key, member);
            }
            TxOp::HSet { key, field, value } => {
                pipe.hset(key, field, value);
            }
            TxOp::HDel { key, field } => {
                pipe.hdel(key, field);
            }
            TxOp::Set { key, value } => {
                pipe.set(key, value);
            }
            TxOp::Del { key } => {
                pipe.del(key);
            }
            TxOp::Incr { key } => {
                pipe.incr(key, 1);
            }
        }
    }
    pipe
}

fn decode_results(ops: &[TxOp], raw: Vec<redis::Value>) -> Result<Vec<TxResult>, StoreError> {
    ops.iter()
        .zip(raw)
        .map(|(op, value)| -> Result<TxResult, StoreError> {
            Ok(match op {
                TxOp::ZAdd { .. } => {
                    let added: i64 = from_redis_value(&value).map_err(StoreError::from)?;
                    TxResult::Added(added == 1)
                }
                TxOp::ZRem { .. } => {
                    let removed: i64 = from_redis_value(&value).map_err(StoreError::from)?;
                    TxResult::Removed(removed > 0)
                }
                TxOp::HDel { .. } => {
                    let removed: i64 = from_redis_value(&value).map_err(StoreError::from)?;
                    TxResult::Removed(removed > 0)
                }
                TxOp::Incr { .. } => {
                    let n: i64 = from_redis_value(&value).map_err(StoreError::from)?;
                    TxResult::Incremented(n)
                }
                TxOp::HSet { .. } => {
                    let created: i64 = from_redis_value(&value).map_err(StoreError::from)?;
                    TxResult::HashSet(created == 1)
                }
                TxOp::Set { .. } | TxOp::Del { .. } => TxResult::Ok,
            })
        })
        .collect()
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<bool, StoreError> {
        let added: i64 = self.conn().zadd(key, member, score).await?;
        Ok(added == 1)
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError> {
        let score: Option<f64> = self.conn().zscore(key, member).await?;
        Ok(score)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let removed: i64 = self.conn().zrem(key, member).await?;
        Ok(removed > 0)
    }

    async fn zrange_by_index(
        &self,
        key: &str,
        lo: isize,
        hi: isize,
    ) -> Result<Vec<String>, StoreError> {
        let members: Vec<String> = self.conn().zrange(key, lo, hi).await?;
        Ok(members)
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min_score: f64,
        max_score: f64,
    ) -> Result<Vec<String>, StoreError> {
        let members: Vec<String> = self
            .conn()
            .zrangebyscore(key, min_score, max_score)
            .await?;
        Ok(members)
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        let count: u64 = self.conn().zcard(key).await?;
        Ok(count)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let _: () = self.conn().hset(key, field, value).await?;
        Ok(())
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let values: Vec<Option<String>> = self.conn().hget(key, fields).await?;
        Ok(values)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let removed: i64 = self.conn().hdel(key, field).await?;
        Ok(removed > 0)
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, StoreError> {
        let map: std::collections::HashMap<String, String> = self.conn().hgetall(key).await?;
        Ok(map.into_iter().collect())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = self.conn().get(key).await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _: () = self.conn().set(key, value).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let _: () = self.conn().del(key).await?;
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let n: i64 = self.conn().incr(key, 1).await?;
        Ok(n)
    }

    async fn flush_prefix(&self, prefix: &str) -> Result<(), StoreError> {
        let pattern = format!("{prefix}*");
        let keys: Vec<String> = self.conn().keys(&pattern).await?;
        if keys.is_empty() {
            return Ok(());
        }
        let _: () = self.conn().del(keys).await?;
        Ok(())
    }

    async fn transaction(&self, ops: Vec<TxOp>) -> Result<Vec<TxResult>, StoreError> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }
        let pipe = build_pipeline(&ops);
        let raw: Vec<redis::Value> = pipe
            .query_async(&mut self.conn())
            .await
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        decode_results(&ops, raw)
    }

    async fn close(&self) -> Result<(), StoreError> {
        // ConnectionManager has no explicit close; dropping the last
        // clone tears the connection down.
        Ok(())
    }
}
