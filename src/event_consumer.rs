//! Bounded-concurrency worker pool draining the event queue and
//! dispatching to the processor.

use crate::backoff::backoff;
use crate::event_processor::{Classification, EventProcessor, ProcessorError};
use crate::event_queue::{EventQueue, EventType, QueueError, QueuedEvent};
use crate::shutdown::ShutdownSignal;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Drains the queue with up to `concurrency` in-flight handler tasks,
/// polling each event type in round-robin and sleeping between rounds when
/// every type comes back empty.
pub struct EventConsumer {
    queue: Arc<EventQueue>,
    processor: Arc<dyn EventProcessor>,
    concurrency: usize,
    poll_interval: Duration,
    shutdown: Arc<ShutdownSignal>,
}

impl EventConsumer {
    pub fn new(
        queue: Arc<EventQueue>,
        processor: Arc<dyn EventProcessor>,
        concurrency: usize,
        poll_interval: Duration,
        shutdown: Arc<ShutdownSignal>,
    ) -> Self {
        Self {
            queue,
            processor,
            concurrency: concurrency.max(1),
            poll_interval,
            shutdown,
        }
    }

    /// Thin pass-through to `queue.enqueue_event`, exposed so external
    /// callers (the webhook handler, the scheduler's backfill) don't need
    /// their own queue handle.
    pub async fn add_event(&self, event: QueuedEvent) -> Result<bool, ConsumerError> {
        Ok(self.queue.enqueue_event(event).await?)
    }

    /// Replays any in-flight work left over from a previous run, then
    /// drains the queue until shutdown is requested and every in-flight
    /// task has finished.
    pub async fn run(&self) -> Result<(), ConsumerError> {
        self.queue.move_processing_to_pending().await?;

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut inflight = JoinSet::new();

        while !self.shutdown.is_shutdown_requested() {
            let mut drained_any = false;

            for event_type in EventType::ALL {
                if self.shutdown.is_shutdown_requested() {
                    break;
                }
                let available = semaphore.available_permits();
                if available == 0 {
                    continue;
                }
                let events = self.queue.dequeue_events(event_type, available as i64).await?;
                if events.is_empty() {
                    continue;
                }
                drained_any = true;

                for event in events {
                    let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
                    let queue = self.queue.clone();
                    let processor = self.processor.clone();
                    inflight.spawn(async move {
                        let _permit = permit;
                        handle_one(queue, processor, event).await
                    });
                }
            }

            // Reap finished tasks without blocking the dequeue loop.
            while let Some(result) = inflight.try_join_next() {
                if let Err(join_err) = result {
                    error!(error = %join_err, "event handler task panicked");
                }
            }

            if !drained_any {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        info!("consumer shutdown requested, draining in-flight handlers");
        while let Some(result) = inflight.join_next().await {
            if let Err(join_err) = result {
                error!(error = %join_err, "event handler task panicked during drain");
            }
        }
        Ok(())
    }
}

async fn handle_one(queue: Arc<EventQueue>, processor: Arc<dyn EventProcessor>, event: QueuedEvent) {
    match processor.handle(&event).await {
        Ok(()) => {
            if let Err(e) = queue.acknowledge_processed_event(&event).await {
                error!(id = %event.id, error = %e, "failed to acknowledge processed event");
            }
        }
        Err(err) => on_failure(queue, event, err).await,
    }
}

async fn on_failure(queue: Arc<EventQueue>, event: QueuedEvent, err: ProcessorError) {
    let classification = err.classify();
    let next_retry = event.retry_count + 1;

    let should_retry =
        matches!(classification, Classification::Transient) && next_retry <= event.max_retries;

    if should_retry {
        let delay = backoff(next_retry);
        let mut retried = event.clone();
        retried.retry_count = next_retry;
        retried.scheduled_at = chrono::Utc::now().timestamp_millis() + delay.as_millis() as i64;
        warn!(id = %event.id, retry_count = next_retry, error = %err, "retrying event after backoff");
        if let Err(e) = queue.enqueue_event(retried).await {
            error!(id = %event.id, error = %e, "failed to re-enqueue event for retry");
        }
    } else {
        warn!(id = %event.id, error = %err, "moving event to dead-letter queue");
        if let Err(e) = queue.move_to_dead_letter_queue(&event, &err.to_string()).await {
            error!(id = %event.id, error = %e, "failed to move event to dead-letter queue");
        }
    }
}
