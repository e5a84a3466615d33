//! Per-type FIFO pending + processing + dead-letter event queue, backed
//! by the key-value store abstraction.
//!
//! Keyspace (prefix `event-queue`):
//! - `:pending:<EventType>` — ordered set, score = scheduledAt
//! - `:processing:<EventType>` — ordered set, score = dequeue timestamp
//! - `:dead-letter` — ordered set, score = movedAt
//! - `:data` — hash, id -> JSON payload
//! - `:status`, `:backfill-cursor`, `:metrics:*` — auxiliary strings/counters

pub mod error;
pub mod types;

pub use error::QueueError;
pub use types::{
    DeadLetterEntry, EventMetadata, EventType, LastAction, Priority, QueueDepth, QueueStatus,
    QueueStatusRecord, QueuedEvent,
};

use crate::kvstore::{KeyValueStore, TxOp};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, warn};

const MAX_DEQUEUE_COUNT: i64 = 1000;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct EventQueue {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl EventQueue {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            prefix: "event-queue".to_string(),
        }
    }

    fn pending_key(&self, t: EventType) -> String {
        format!("{}:pending:{}", self.prefix, t)
    }

    fn processing_key(&self, t: EventType) -> String {
        format!("{}:processing:{}", self.prefix, t)
    }

    fn dead_letter_key(&self) -> String {
        format!("{}:dead-letter", self.prefix)
    }

    fn data_key(&self) -> String {
        format!("{}:data", self.prefix)
    }

    fn status_key(&self) -> String {
        format!("{}:status", self.prefix)
    }

    fn backfill_cursor_key(&self) -> String {
        format!("{}:backfill-cursor", self.prefix)
    }

    fn metric_key(&self, name: &str, labels: &[(&str, &str)]) -> String {
        let mut sorted: Vec<&(&str, &str)> = labels.iter().collect();
        sorted.sort_by_key(|(k, _)| *k);
        let label_str = sorted
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        format!("{}:metrics:{}:{}", self.prefix, name, label_str)
    }

    /// Validates and enqueues `event`. Returns `true` iff an event with
    /// the same id already existed in pending or processing for its type.
    pub async fn enqueue_event(&self, event: QueuedEvent) -> Result<bool, QueueError> {
        if event.id.is_empty() {
            return Err(QueueError::EmptyId);
        }
        if event.scheduled_at < 0 {
            return Err(QueueError::InvalidScheduledAt(event.scheduled_at));
        }

        let already_pending = self
            .store
            .zscore(&self.pending_key(event.event_type), &event.id)
            .await?
            .is_some();
        let already_processing = self
            .store
            .zscore(&self.processing_key(event.event_type), &event.id)
            .await?
            .is_some();
        if already_pending && already_processing {
            error!(id = %event.id, "event present in both pending and processing sets");
        }
        let existed = already_pending || already_processing;

        let payload = serde_json::to_string(&event).map_err(|e| QueueError::Corrupted {
            id: event.id.clone(),
            reason: e.to_string(),
        })?;

        self.store
            .transaction(vec![
                TxOp::ZRem {
                    key: self.processing_key(event.event_type),
                    member: event.id.clone(),
                },
                TxOp::HSet {
                    key: self.data_key(),
                    field: event.id.clone(),
                    value: payload,
                },
                TxOp::ZAdd {
                    key: self.pending_key(event.event_type),
                    score: event.scheduled_at as f64,
                    member: event.id.clone(),
                },
            ])
            .await?;

        Ok(existed)
    }

    pub async fn has_event(&self, event_type: EventType, id: &str) -> Result<bool, QueueError> {
        if self
            .store
            .zscore(&self.pending_key(event_type), id)
            .await?
            .is_some()
        {
            return Ok(true);
        }
        Ok(self
            .store
            .zscore(&self.processing_key(event_type), id)
            .await?
            .is_some())
    }

    /// Recovers from a crash mid-processing: moves every `processing:<type>`
    /// entry back to `pending:<type>` at its original `scheduledAt`, purging
    /// any entry whose data is missing or unparseable.
    pub async fn move_processing_to_pending(&self) -> Result<(), QueueError> {
        for event_type in EventType::ALL {
            let ids = self
                .store
                .zrange_by_index(&self.processing_key(event_type), 0, -1)
                .await?;
            if ids.is_empty() {
                continue;
            }

            let payloads = self.store.hmget(&self.data_key(), &ids).await?;
            let mut ops = Vec::new();
            for (id, payload) in ids.into_iter().zip(payloads) {
                match payload.as_deref().map(serde_json::from_str::<QueuedEvent>) {
                    Some(Ok(parsed)) => {
                        ops.push(TxOp::ZRem {
                            key: self.processing_key(event_type),
                            member: id.clone(),
                        });
                        ops.push(TxOp::ZAdd {
                            key: self.pending_key(event_type),
                            score: parsed.scheduled_at as f64,
                            member: id,
                        });
                    }
                    _ => {
                        warn!(%id, "purging orphaned/corrupted processing entry on recovery");
                        ops.push(TxOp::ZRem {
                            key: self.processing_key(event_type),
                            member: id.clone(),
                        });
                        ops.push(TxOp::HDel {
                            key: self.data_key(),
                            field: id,
                        });
                    }
                }
            }
            if !ops.is_empty() {
                self.store.transaction(ops).await?;
            }
        }
        Ok(())
    }

    /// Pulls up to `count` (clamped to `[1, 1000]`) of the lowest-scored
    /// ids off `pending:<type>`, moves them to `processing:<type>`, and
    /// returns the parsed events in FIFO order. Events whose
    /// `scheduledAt` is still in the future are left in pending.
    pub async fn dequeue_events(
        &self,
        event_type: EventType,
        count: i64,
    ) -> Result<Vec<QueuedEvent>, QueueError> {
        if count <= 0 {
            return Ok(Vec::new());
        }
        let count = count.min(MAX_DEQUEUE_COUNT);

        let ids = self
            .store
            .zrange_by_index(&self.pending_key(event_type), 0, count - 1)
            .await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let payloads = self.store.hmget(&self.data_key(), &ids).await?;
        let now = now_ms();

        let mut ready = Vec::new();
        let mut ops = Vec::new();
        for (id, payload) in ids.into_iter().zip(payloads) {
            match payload.as_deref().map(serde_json::from_str::<QueuedEvent>) {
                Some(Ok(parsed)) if parsed.scheduled_at <= now => {
                    ops.push(TxOp::ZRem {
                        key: self.pending_key(event_type),
                        member: id.clone(),
                    });
                    ops.push(TxOp::ZAdd {
                        key: self.processing_key(event_type),
                        score: now as f64,
                        member: id,
                    });
                    ready.push(parsed);
                }
                Some(Ok(_deferred)) => {
                    // scheduledAt > now: leave it in pending.
                }
                _ => {
                    warn!(%id, "purging orphaned/corrupted pending entry");
                    ops.push(TxOp::ZRem {
                        key: self.pending_key(event_type),
                        member: id.clone(),
                    });
                    ops.push(TxOp::HDel {
                        key: self.data_key(),
                        field: id,
                    });
                }
            }
        }

        if !ops.is_empty() {
            self.store.transaction(ops).await?;
        }
        Ok(ready)
    }

    pub async fn acknowledge_processed_event(&self, event: &QueuedEvent) -> Result<(), QueueError> {
        let status = serde_json::to_string(&QueueStatusRecord {
            last_processed_at: now_ms(),
            last_action: LastAction::Processed,
        })
        .expect("QueueStatusRecord always serializes");

        self.store
            .transaction(vec![
                TxOp::ZRem {
                    key: self.processing_key(event.event_type),
                    member: event.id.clone(),
                },
                TxOp::HDel {
                    key: self.data_key(),
                    field: event.id.clone(),
                },
                TxOp::Set {
                    key: self.status_key(),
                    value: status,
                },
            ])
            .await?;
        Ok(())
    }

    pub async fn move_to_dead_letter_queue(
        &self,
        event: &QueuedEvent,
        error_text: &str,
    ) -> Result<(), QueueError> {
        let now = now_ms();
        let entry = DeadLetterEntry {
            event: event.clone(),
            error: error_text.to_string(),
            moved_at: now,
        };
        let payload = serde_json::to_string(&entry).map_err(|e| QueueError::Corrupted {
            id: event.id.clone(),
            reason: e.to_string(),
        })?;
        let status = serde_json::to_string(&QueueStatusRecord {
            last_processed_at: now,
            last_action: LastAction::DeadLetter,
        })
        .expect("QueueStatusRecord always serializes");

        self.store
            .transaction(vec![
                TxOp::ZRem {
                    key: self.processing_key(event.event_type),
                    member: event.id.clone(),
                },
                TxOp::ZAdd {
                    key: self.dead_letter_key(),
                    score: now as f64,
                    member: event.id.clone(),
                },
                TxOp::HSet {
                    key: self.data_key(),
                    field: event.id.clone(),
                    value: payload,
                },
                TxOp::Set {
                    key: self.status_key(),
                    value: status,
                },
            ])
            .await?;
        Ok(())
    }

    /// Removes every dead-letter entry whose `movedAt` is at or before
    /// `now - ttl_ms`. Returns the count removed.
    pub async fn cleanup_expired_dead_letter_entries(&self, ttl_ms: i64) -> Result<u64, QueueError> {
        let threshold = (now_ms() - ttl_ms) as f64;
        let ids = self
            .store
            .zrange_by_score(&self.dead_letter_key(), f64::NEG_INFINITY, threshold)
            .await?;
        if ids.is_empty() {
            return Ok(0);
        }
        let mut ops = Vec::with_capacity(ids.len() * 2);
        for id in &ids {
            ops.push(TxOp::ZRem {
                key: self.dead_letter_key(),
                member: id.clone(),
            });
            ops.push(TxOp::HDel {
                key: self.data_key(),
                field: id.clone(),
            });
        }
        self.store.transaction(ops).await?;
        Ok(ids.len() as u64)
    }

    pub async fn get_queue_depths(&self) -> Result<HashMap<EventType, QueueDepth>, QueueError> {
        let mut depths = HashMap::new();
        for event_type in EventType::ALL {
            let pending = self.store.zcard(&self.pending_key(event_type)).await?;
            let processing = self.store.zcard(&self.processing_key(event_type)).await?;
            depths.insert(event_type, QueueDepth { pending, processing });
        }
        Ok(depths)
    }

    pub async fn get_queue_status(&self) -> Result<QueueStatus, QueueError> {
        let depths = self.get_queue_depths().await?;
        let (pending, processing) = depths
            .values()
            .fold((0u64, 0u64), |(p, r), d| (p + d.pending, r + d.processing));
        let dead_letter = self.store.zcard(&self.dead_letter_key()).await?;
        let last_processed_at = self
            .store
            .get(&self.status_key())
            .await?
            .and_then(|raw| serde_json::from_str::<QueueStatusRecord>(&raw).ok())
            .map(|s| s.last_processed_at);

        Ok(QueueStatus {
            pending,
            processing,
            dead_letter,
            last_processed_at,
        })
    }

    pub async fn get_backfill_cursor(&self) -> Result<Option<String>, QueueError> {
        Ok(self.store.get(&self.backfill_cursor_key()).await?)
    }

    pub async fn set_backfill_cursor(&self, cursor: &str) -> Result<(), QueueError> {
        self.store.put(&self.backfill_cursor_key(), cursor).await?;
        Ok(())
    }

    pub async fn increment_metric(&self, name: &str, labels: &[(&str, &str)]) -> Result<i64, QueueError> {
        Ok(self.store.increment(&self.metric_key(name, labels)).await?)
    }
}
