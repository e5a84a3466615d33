use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key-value backend connection failed: {0}")]
    Connection(String),

    #[error("key-value backend operation failed: {0}")]
    Command(String),

    #[error("transaction aborted: {0}")]
    Transaction(String),

    #[error("value at key could not be decoded: {0}")]
    Decode(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Command(e.to_string())
    }
}
