//! Wire and stored types for the event queue (spec §3, Data Model).

use serde::{Deserialize, Serialize};

/// The closed set of event kinds the queue accepts. New kinds are added
/// here, never inferred from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    InvoiceEnqueued,
    SettlementEnqueued,
}

impl EventType {
    pub const ALL: [EventType; 2] = [EventType::InvoiceEnqueued, EventType::SettlementEnqueued];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::InvoiceEnqueued => "InvoiceEnqueued",
            EventType::SettlementEnqueued => "SettlementEnqueued",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    High,
    Normal,
    Low,
}

/// Provenance/correlation fields carried alongside an event, none of
/// which affect queue mechanics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMetadata {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_webhook_id: Option<String>,
}

/// An event as it sits in the queue: the unit of dequeue, retry, and
/// dead-lettering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: serde_json::Value,
    pub priority: Priority,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Epoch milliseconds; also the ordered-set score within its type.
    pub scheduled_at: i64,
    pub metadata: EventMetadata,
}

/// A [`QueuedEvent`] that exceeded its retry budget, with the failure
/// that moved it to the dead-letter set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    #[serde(flatten)]
    pub event: QueuedEvent,
    pub error: String,
    pub moved_at: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueDepth {
    pub pending: u64,
    pub processing: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LastAction {
    Processed,
    DeadLetter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatusRecord {
    pub last_processed_at: i64,
    pub last_action: LastAction,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending: u64,
    pub processing: u64,
    pub dead_letter: u64,
    pub last_processed_at: Option<i64>,
}
