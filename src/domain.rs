//! Shared domain types that flow between the event queue, the processor,
//! and the purchase cache. The core treats `Invoice` as opaque data it
//! relays and deduplicates against — it never computes invoice economics.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HubStatus {
    #[serde(rename = "ADDED")]
    Added,
    #[serde(rename = "DISPATCHED")]
    Dispatched,
    #[serde(rename = "SETTLED")]
    Settled,
    #[serde(rename = "SETTLED_AND_MANUALLY_EXECUTED")]
    SettledAndManuallyExecuted,
}

impl Default for HubStatus {
    fn default() -> Self {
        HubStatus::Added
    }
}

/// A cross-chain invoice, as observed from on-chain events. Opaque to the
/// core beyond the fields needed for dedup and routing. Only `intent_id`,
/// `amount`, `origin`, and `destinations` are required on the wire; the
/// rest default so a minimal webhook payload still parses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub intent_id: String,
    #[serde(default)]
    pub owner: String,
    /// Arbitrary-precision decimal string — never parsed as a float here.
    pub amount: String,
    pub origin: String,
    pub destinations: Vec<String>,
    #[serde(default)]
    pub ticker_hash: String,
    #[serde(default)]
    pub entry_epoch: u64,
    #[serde(default)]
    pub hub_status: HubStatus,
    #[serde(default)]
    pub hub_invoice_enqueued_timestamp: i64,
}

/// The fulfilling intent submitted against an [`Invoice`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Purchase {
    pub intent_id: String,
    pub params: serde_json::Value,
}

/// A recorded in-flight (or completed) fulfillment, keyed by
/// `target.intent_id` in the purchase cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseAction {
    pub target: Invoice,
    pub purchase: Purchase,
    pub transaction_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_type: Option<String>,
    pub cached_at: i64,
}
