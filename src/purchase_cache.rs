//! Purchase cache: the deduplication boundary that guarantees
//! at-most-one in-flight fulfillment per invoice, across restarts.
//!
//! This is the hard part — without it a crash-and-retry of the consumer
//! could resubmit a fulfilling transaction for an invoice that already
//! has one in flight.

use crate::domain::PurchaseAction;
use crate::kvstore::{KeyValueStore, TxOp, TxResult};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("store error: {0}")]
    Store(#[from] crate::kvstore::StoreError),
    #[error("failed to serialize purchase action: {0}")]
    Serialize(#[from] serde_json::Error),
}

const NAMESPACE: &str = "purchases";

pub struct PurchaseCache {
    store: Arc<dyn KeyValueStore>,
}

impl PurchaseCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn data_key(&self) -> String {
        format!("{NAMESPACE}:data")
    }

    /// Upserts `actions` keyed by `target.intent_id`. Returns the number
    /// of entries that were newly created (updates count as 0). Empty
    /// input is a no-op that never touches the store.
    pub async fn add_purchases(&self, actions: &[PurchaseAction]) -> Result<usize, CacheError> {
        if actions.is_empty() {
            return Ok(0);
        }

        let mut ops = Vec::with_capacity(actions.len());
        for action in actions {
            let payload = serde_json::to_string(action)?;
            ops.push(TxOp::HSet {
                key: self.data_key(),
                field: action.target.intent_id.clone(),
                value: payload,
            });
        }

        let results = self.store.transaction(ops).await?;
        let created = results
            .iter()
            .filter(|r| matches!(r, TxResult::HashSet(true)))
            .count();
        Ok(created)
    }

    /// Multi-gets `ids`, dropping misses, preserving the input order of
    /// survivors. Always issues a lookup, even for empty input, so the
    /// round-trip is visible for observability.
    pub async fn get_purchases(&self, ids: &[String]) -> Result<Vec<PurchaseAction>, CacheError> {
        let fields = ids.to_vec();
        let values = self.store.hmget(&self.data_key(), &fields).await?;
        values
            .into_iter()
            .flatten()
            .map(|raw| serde_json::from_str(&raw).map_err(CacheError::from))
            .collect()
    }

    pub async fn get_all_purchases(&self) -> Result<Vec<PurchaseAction>, CacheError> {
        let entries = self.store.hgetall(&self.data_key()).await?;
        entries
            .into_iter()
            .map(|(_, raw)| serde_json::from_str(&raw).map_err(CacheError::from))
            .collect()
    }

    pub async fn has_purchase(&self, intent_id: &str) -> Result<bool, CacheError> {
        let ids = vec![intent_id.to_string()];
        let values = self.store.hmget(&self.data_key(), &ids).await?;
        Ok(values.first().is_some_and(|v| v.is_some()))
    }

    /// Returns the count of fields actually removed. Empty input is a
    /// no-op that never touches the store.
    pub async fn remove_purchases(&self, ids: &[String]) -> Result<usize, CacheError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ops = ids
            .iter()
            .map(|id| TxOp::HDel {
                key: self.data_key(),
                field: id.clone(),
            })
            .collect();
        let results = self.store.transaction(ops).await?;
        Ok(results
            .iter()
            .filter(|r| matches!(r, TxResult::Removed(true)))
            .count())
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        self.store.flush_prefix(NAMESPACE).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HubStatus, Invoice, Purchase};
    use crate::kvstore::MemoryStore;

    fn purchase(intent_id: &str) -> PurchaseAction {
        PurchaseAction {
            target: Invoice {
                intent_id: intent_id.to_string(),
                owner: "0xowner".into(),
                amount: "1000000000000000000".into(),
                origin: "10".into(),
                destinations: vec!["1".into()],
                ticker_hash: "0xticker".into(),
                entry_epoch: 1,
                hub_status: HubStatus::Added,
                hub_invoice_enqueued_timestamp: 1,
            },
            purchase: Purchase {
                intent_id: intent_id.to_string(),
                params: serde_json::json!({}),
            },
            transaction_hash: "0xhash".into(),
            transaction_type: None,
            cached_at: 1,
        }
    }

    #[tokio::test]
    async fn empty_add_and_remove_are_store_free() {
        let store = Arc::new(MemoryStore::new());
        let cache = PurchaseCache::new(store);
        assert_eq!(cache.add_purchases(&[]).await.unwrap(), 0);
        assert_eq!(cache.remove_purchases(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn repeated_add_counts_only_the_first_create() {
        let store = Arc::new(MemoryStore::new());
        let cache = PurchaseCache::new(store);
        let action = purchase("intent-Z");

        let mut total_created = 0;
        for _ in 0..5 {
            total_created += cache.add_purchases(&[action.clone()]).await.unwrap();
        }

        assert_eq!(total_created, 1);
        assert_eq!(cache.get_all_purchases().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_purchases_preserves_order_and_drops_misses() {
        let store = Arc::new(MemoryStore::new());
        let cache = PurchaseCache::new(store);
        cache
            .add_purchases(&[purchase("intent-A"), purchase("intent-B")])
            .await
            .unwrap();

        let found = cache
            .get_purchases(&[
                "intent-B".to_string(),
                "missing".to_string(),
                "intent-A".to_string(),
            ])
            .await
            .unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].target.intent_id, "intent-B");
        assert_eq!(found[1].target.intent_id, "intent-A");
    }

    #[tokio::test]
    async fn has_purchase_and_remove() {
        let store = Arc::new(MemoryStore::new());
        let cache = PurchaseCache::new(store);
        cache.add_purchases(&[purchase("intent-A")]).await.unwrap();

        assert!(cache.has_purchase("intent-A").await.unwrap());
        assert_eq!(
            cache
                .remove_purchases(&["intent-A".to_string()])
                .await
                .unwrap(),
            1
        );
        assert!(!cache.has_purchase("intent-A").await.unwrap());
    }

    #[tokio::test]
    async fn clear_flushes_the_namespace() {
        let store = Arc::new(MemoryStore::new());
        let cache = PurchaseCache::new(store);
        cache.add_purchases(&[purchase("intent-A")]).await.unwrap();
        cache.clear().await.unwrap();
        assert!(cache.get_all_purchases().await.unwrap().is_empty());
    }
}
