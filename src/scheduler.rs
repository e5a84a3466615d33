//! A fixed-tick background task that emits queue metrics, reconciles
//! missed webhooks, and reaps expired dead-letter entries. A periodic
//! tick guarded against re-entry and against running past a shutdown
//! request.

use crate::event_queue::{EventMetadata, EventQueue, EventType, Priority, QueuedEvent};
use crate::shutdown::ShutdownSignal;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A webhook the upstream event source reports as missed, with enough
/// payload to rebuild the `QueuedEvent` the original webhook would have
/// produced.
#[derive(Debug, Clone)]
pub struct BackfilledWebhook {
    pub id: String,
    pub event_type: EventType,
    pub data: serde_json::Value,
}

/// Looks up webhooks missed between the persisted backfill cursor and the
/// current upstream head. The upstream event source (indexer/RPC) lives
/// outside this crate; this is the seam it plugs into.
#[async_trait::async_trait]
pub trait BackfillSource: Send + Sync {
    /// Returns `(new_cursor, webhooks_since_cursor)`.
    async fn since(&self, cursor: Option<&str>) -> anyhow::Result<(String, Vec<BackfilledWebhook>)>;
}

/// A source that reports no missed webhooks — the default until an
/// indexer integration is wired in.
pub struct NoopBackfillSource;

#[async_trait::async_trait]
impl BackfillSource for NoopBackfillSource {
    async fn since(&self, cursor: Option<&str>) -> anyhow::Result<(String, Vec<BackfilledWebhook>)> {
        Ok((cursor.unwrap_or_default().to_string(), Vec::new()))
    }
}

pub struct MaintenanceScheduler {
    queue: Arc<EventQueue>,
    backfill: Arc<dyn BackfillSource>,
    tick_interval: Duration,
    dead_letter_ttl: Duration,
    /// `maxRetries` stamped onto events rebuilt from the backfill source,
    /// the same default the webhook intake (C6) uses for fresh events.
    backfill_max_retries: u32,
    shutdown: Arc<ShutdownSignal>,
    ticking: AtomicBool,
}

impl MaintenanceScheduler {
    pub fn new(
        queue: Arc<EventQueue>,
        backfill: Arc<dyn BackfillSource>,
        tick_interval: Duration,
        dead_letter_ttl: Duration,
        backfill_max_retries: u32,
        shutdown: Arc<ShutdownSignal>,
    ) -> Self {
        Self {
            queue,
            backfill,
            tick_interval,
            dead_letter_ttl,
            backfill_max_retries,
            shutdown,
            ticking: AtomicBool::new(false),
        }
    }

    /// Runs ticks until shutdown is requested. A tick that is still
    /// running when the next one is due is skipped rather than overlapped.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        while !self.shutdown.is_shutdown_requested() {
            interval.tick().await;
            if self.shutdown.is_shutdown_requested() {
                break;
            }
            if self
                .ticking
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                warn!("skipping maintenance tick: previous tick still running");
                continue;
            }
            self.tick().await;
            self.ticking.store(false, Ordering::SeqCst);
        }
    }

    async fn tick(&self) {
        if let Err(e) = self.emit_queue_metrics().await {
            error!(error = %e, "failed to emit queue metrics this tick");
        }
        if let Err(e) = self.reconcile_backfill().await {
            error!(error = %e, "failed to reconcile backfill this tick");
        }
        match self
            .queue
            .cleanup_expired_dead_letter_entries(self.dead_letter_ttl.as_millis() as i64)
            .await
        {
            Ok(removed) if removed > 0 => info!(removed, "cleaned up expired dead-letter entries"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "failed to clean up expired dead-letter entries"),
        }
        // Earmark/rebalance-operation expiry and rebalance-evaluation
        // triggering are out of scope here: the rebalancing policy and
        // inventory model live outside this crate. This tick only logs
        // the intent so the seam is visible to whatever wires it in.
        debug!("rebalance evaluation is a declared interface only, not implemented here");
    }

    async fn emit_queue_metrics(&self) -> anyhow::Result<()> {
        let depths = self.queue.get_queue_depths().await?;
        for (event_type, depth) in depths {
            self.queue
                .increment_metric("queue.tick", &[("type", event_type.as_str())])
                .await?;
            debug!(
                %event_type,
                pending = depth.pending,
                processing = depth.processing,
                "queue depth"
            );
        }
        let status = self.queue.get_queue_status().await?;
        debug!(dead_letter = status.dead_letter, "dead-letter depth");
        Ok(())
    }

    async fn reconcile_backfill(&self) -> anyhow::Result<()> {
        let cursor = self.queue.get_backfill_cursor().await?;
        let (new_cursor, webhooks) = self.backfill.since(cursor.as_deref()).await?;

        let mut enqueued = 0;
        for webhook in webhooks {
            let event = QueuedEvent {
                id: webhook.id.clone(),
                event_type: webhook.event_type,
                data: webhook.data,
                priority: Priority::Normal,
                retry_count: 0,
                max_retries: self.backfill_max_retries,
                scheduled_at: now_ms(),
                metadata: EventMetadata {
                    source: "backfill".to_string(),
                    ..Default::default()
                },
            };
            match self.queue.enqueue_event(event).await {
                Ok(false) => enqueued += 1,
                Ok(true) => {}
                Err(e) => error!(id = %webhook.id, error = %e, "failed to enqueue backfilled webhook"),
            }
        }
        if enqueued > 0 {
            info!(count = enqueued, "reconciled missed webhooks from backfill source");
        }

        self.queue.set_backfill_cursor(&new_cursor).await?;
        Ok(())
    }
}
