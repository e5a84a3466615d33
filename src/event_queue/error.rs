use crate::kvstore::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("event id must be non-empty")]
    EmptyId,

    #[error("scheduledAt must be >= 0, got {0}")]
    InvalidScheduledAt(i64),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("corrupted payload for event {id}: {reason}")]
    Corrupted { id: String, reason: String },
}
