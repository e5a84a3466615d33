//! Dispatches each queued event to its handler and turns at-least-once
//! delivery into effectively-once fulfillment via the purchase cache.
//!
//! The processor never holds a reference to the consumer or the event
//! queue at all: retry/dead-letter scheduling (spec §4.4) is entirely the
//! consumer's responsibility, so there is no cyclic reference here to
//! break in the first place — the processor only needs the purchase
//! cache and the split-intent planner to decide whether an event
//! succeeded.

use crate::domain::{Invoice, PurchaseAction};
use crate::event_queue::{EventType, QueuedEvent};
use crate::purchase_cache::{CacheError, PurchaseCache};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Whether a processing failure should be retried or sent straight to the
/// dead-letter queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Transient,
    Permanent,
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("{message}")]
    Handler {
        message: String,
        classification: Classification,
    },
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("malformed event payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl ProcessorError {
    pub fn transient(message: impl Into<String>) -> Self {
        ProcessorError::Handler {
            message: message.into(),
            classification: Classification::Transient,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        ProcessorError::Handler {
            message: message.into(),
            classification: Classification::Permanent,
        }
    }

    /// Transient I/O (cache round-trip failures included) is retryable;
    /// a malformed payload is a validation error and never is.
    pub fn classify(&self) -> Classification {
        match self {
            ProcessorError::Handler { classification, .. } => *classification,
            ProcessorError::Cache(_) => Classification::Transient,
            ProcessorError::Payload(_) => Classification::Permanent,
        }
    }
}

/// Substrings that mark a handler failure message as transient, per the
/// patterns observed for blockchain RPC and rate-limited endpoints.
const TRANSIENT_PATTERNS: [&str; 8] = [
    "blockhash not found",
    "block height exceeded",
    "timeout",
    "timed out",
    "429",
    "500",
    "502",
    "503",
];

pub fn classify_message(message: &str) -> Classification {
    let lower = message.to_lowercase();
    if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        Classification::Transient
    } else {
        Classification::Permanent
    }
}

/// Produces a `PurchaseAction` for an `Invoice`, or `None` if no valid
/// allocation exists yet. Split-intent planning, balance lookups, and
/// on-chain submission live outside this crate; this trait is the seam
/// where that implementation plugs in.
#[async_trait]
pub trait SplitIntentPlanner: Send + Sync {
    async fn plan_and_submit(
        &self,
        invoice: &Invoice,
    ) -> Result<Option<PurchaseAction>, ProcessorError>;
}

/// A planner that never finds an allocation — useful in tests and as a
/// placeholder until a real planner/signer is wired in.
pub struct NoopPlanner;

#[async_trait]
impl SplitIntentPlanner for NoopPlanner {
    async fn plan_and_submit(
        &self,
        _invoice: &Invoice,
    ) -> Result<Option<PurchaseAction>, ProcessorError> {
        Ok(None)
    }
}

#[async_trait]
pub trait EventProcessor: Send + Sync {
    async fn handle(&self, event: &QueuedEvent) -> Result<(), ProcessorError>;
}

#[derive(Debug, Deserialize)]
struct SettlementPayload {
    intent_id: String,
}

/// Dispatches by [`EventType`] to the invoice-fulfillment path or the
/// settlement-invalidation path, consulting the purchase cache before any
/// submission so retries never double-fulfill.
pub struct InvoiceEventProcessor {
    cache: Arc<PurchaseCache>,
    planner: Arc<dyn SplitIntentPlanner>,
}

impl InvoiceEventProcessor {
    pub fn new(cache: Arc<PurchaseCache>, planner: Arc<dyn SplitIntentPlanner>) -> Self {
        Self { cache, planner }
    }

    async fn handle_invoice_enqueued(&self, event: &QueuedEvent) -> Result<(), ProcessorError> {
        let invoice: Invoice = serde_json::from_value(event.data.clone())?;

        if self.cache.has_purchase(&invoice.intent_id).await? {
            info!(intent_id = %invoice.intent_id, "purchase already recorded, skipping");
            return Ok(());
        }

        match self.planner.plan_and_submit(&invoice).await? {
            Some(action) => {
                self.cache.add_purchases(&[action]).await?;
                Ok(())
            }
            None => {
                warn!(
                    intent_id = %invoice.intent_id,
                    "no valid allocation produced, evaluating on-demand rebalance"
                );
                Ok(())
            }
        }
    }

    async fn handle_settlement_enqueued(&self, event: &QueuedEvent) -> Result<(), ProcessorError> {
        let settlement: SettlementPayload = serde_json::from_value(event.data.clone())?;
        self.cache
            .remove_purchases(&[settlement.intent_id])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EventProcessor for InvoiceEventProcessor {
    async fn handle(&self, event: &QueuedEvent) -> Result<(), ProcessorError> {
        match event.event_type {
            EventType::InvoiceEnqueued => self.handle_invoice_enqueued(event).await,
            EventType::SettlementEnqueued => self.handle_settlement_enqueued(event).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_queue::{EventMetadata, Priority};
    use crate::kvstore::MemoryStore;

    fn invoice_event(id: &str, intent_id: &str) -> QueuedEvent {
        QueuedEvent {
            id: id.to_string(),
            event_type: EventType::InvoiceEnqueued,
            data: serde_json::json!({
                "intent_id": intent_id,
                "amount": "1000000000000000000",
                "origin": "10",
                "destinations": ["1"],
            }),
            priority: Priority::Normal,
            retry_count: 0,
            max_retries: 10,
            scheduled_at: 1000,
            metadata: EventMetadata::default(),
        }
    }

    fn processor() -> InvoiceEventProcessor {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(PurchaseCache::new(store));
        InvoiceEventProcessor::new(cache, Arc::new(NoopPlanner))
    }

    #[tokio::test]
    async fn invoice_with_no_allocation_is_not_an_error() {
        let processor = processor();
        let event = invoice_event("ev-1", "intent-A");
        processor.handle(&event).await.unwrap();
        assert!(!processor.cache.has_purchase("intent-A").await.unwrap());
    }

    #[tokio::test]
    async fn already_purchased_invoice_is_skipped_idempotently() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(PurchaseCache::new(store));
        let processor = InvoiceEventProcessor::new(cache.clone(), Arc::new(NoopPlanner));

        let action = crate::domain::PurchaseAction {
            target: crate::domain::Invoice {
                intent_id: "intent-A".into(),
                owner: String::new(),
                amount: "1".into(),
                origin: "10".into(),
                destinations: vec!["1".into()],
                ticker_hash: String::new(),
                entry_epoch: 0,
                hub_status: crate::domain::HubStatus::Added,
                hub_invoice_enqueued_timestamp: 0,
            },
            purchase: crate::domain::Purchase {
                intent_id: "intent-A".into(),
                params: serde_json::json!({}),
            },
            transaction_hash: "0xhash".into(),
            transaction_type: None,
            cached_at: 1,
        };
        cache.add_purchases(&[action]).await.unwrap();

        let event = invoice_event("ev-2", "intent-A");
        processor.handle(&event).await.unwrap();
        assert_eq!(cache.get_all_purchases().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn settlement_removes_matching_purchase() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(PurchaseCache::new(store));
        let processor = InvoiceEventProcessor::new(cache.clone(), Arc::new(NoopPlanner));

        let action = crate::domain::PurchaseAction {
            target: crate::domain::Invoice {
                intent_id: "intent-B".into(),
                owner: String::new(),
                amount: "1".into(),
                origin: "10".into(),
                destinations: vec!["1".into()],
                ticker_hash: String::new(),
                entry_epoch: 0,
                hub_status: crate::domain::HubStatus::Added,
                hub_invoice_enqueued_timestamp: 0,
            },
            purchase: crate::domain::Purchase {
                intent_id: "intent-B".into(),
                params: serde_json::json!({}),
            },
            transaction_hash: "0xhash".into(),
            transaction_type: None,
            cached_at: 1,
        };
        cache.add_purchases(&[action]).await.unwrap();

        let event = QueuedEvent {
            id: "ev-settle-1".into(),
            event_type: EventType::SettlementEnqueued,
            data: serde_json::json!({ "intent_id": "intent-B" }),
            priority: Priority::Normal,
            retry_count: 0,
            max_retries: 10,
            scheduled_at: 1000,
            metadata: EventMetadata::default(),
        };
        processor.handle(&event).await.unwrap();
        assert!(!cache.has_purchase("intent-B").await.unwrap());
    }

    #[test]
    fn classifies_transient_and_permanent_messages() {
        assert_eq!(
            classify_message("blockhash not found"),
            Classification::Transient
        );
        assert_eq!(
            classify_message("invoice ticker unsupported"),
            Classification::Permanent
        );
    }
}
