//! End-to-end scenarios, one test per literal case, run against the
//! in-memory key-value store fake.

use mark_invoice_core::domain::{HubStatus, Invoice, Purchase, PurchaseAction};
use mark_invoice_core::event_queue::{EventMetadata, EventType, LastAction, Priority, QueuedEvent};
use mark_invoice_core::kvstore::MemoryStore;
use mark_invoice_core::purchase_cache::PurchaseCache;
use mark_invoice_core::{event_queue::EventQueue, kvstore::KeyValueStore};
use std::sync::Arc;

fn event(id: &str, scheduled_at: i64, max_retries: u32) -> QueuedEvent {
    QueuedEvent {
        id: id.to_string(),
        event_type: EventType::InvoiceEnqueued,
        data: serde_json::json!({
            "intent_id": "intent-A",
            "amount": "1000000000000000000",
            "origin": "10",
            "destinations": ["1"],
        }),
        priority: Priority::Normal,
        retry_count: 0,
        max_retries,
        scheduled_at,
        metadata: EventMetadata::default(),
    }
}

/// Happy path InvoiceEnqueued.
#[tokio::test]
async fn s1_happy_path_invoice_enqueued() {
    let store = Arc::new(MemoryStore::new());
    let queue = EventQueue::new(store.clone());

    queue.enqueue_event(event("ev-1", 1000, 10)).await.unwrap();

    let dequeued = queue
        .dequeue_events(EventType::InvoiceEnqueued, 10)
        .await
        .unwrap();
    assert_eq!(dequeued.len(), 1);
    assert_eq!(dequeued[0].id, "ev-1");
    let data = store
        .hmget("event-queue:data", &["ev-1".to_string()])
        .await
        .unwrap();
    assert!(data[0].is_some());

    let status = queue.get_queue_status().await.unwrap();
    assert_eq!(status.processing, 1);

    queue.acknowledge_processed_event(&dequeued[0]).await.unwrap();

    let status = queue.get_queue_status().await.unwrap();
    assert_eq!(status.processing, 0);
    assert_eq!(status.pending, 0);
    assert!(status.last_processed_at.is_some());
}

/// Duplicate webhook.
#[tokio::test]
async fn s2_duplicate_webhook_returns_true_on_second_call() {
    let store = Arc::new(MemoryStore::new());
    let queue = EventQueue::new(store);

    let first = queue.enqueue_event(event("ev-2", 1000, 10)).await.unwrap();
    assert!(!first);
    let second = queue.enqueue_event(event("ev-2", 1000, 10)).await.unwrap();
    assert!(second);

    let depths = queue.get_queue_depths().await.unwrap();
    assert_eq!(depths[&EventType::InvoiceEnqueued].pending, 1);
}

/// Crash replay.
#[tokio::test]
async fn s3_crash_replay_restores_pending_with_original_score() {
    let store = Arc::new(MemoryStore::new());
    let queue = EventQueue::new(store.clone());

    let e = event("ev-3", 500, 10);
    let payload = serde_json::to_string(&e).unwrap();
    store
        .zadd("event-queue:processing:InvoiceEnqueued", 500.0, "ev-3")
        .await
        .unwrap();
    store.hset("event-queue:data", "ev-3", &payload).await.unwrap();

    queue.move_processing_to_pending().await.unwrap();

    let depths = queue.get_queue_depths().await.unwrap();
    assert_eq!(depths[&EventType::InvoiceEnqueued].processing, 0);
    assert_eq!(depths[&EventType::InvoiceEnqueued].pending, 1);
    let score = store
        .zscore("event-queue:pending:InvoiceEnqueued", "ev-3")
        .await
        .unwrap();
    assert_eq!(score, Some(500.0));
}

/// Transient retries then DLQ.
#[tokio::test]
async fn s4_transient_retries_exhaust_then_dead_letter() {
    let store = Arc::new(MemoryStore::new());
    let queue = EventQueue::new(store);

    queue.enqueue_event(event("ev-4", 0, 2)).await.unwrap();

    for attempt in 0..3u32 {
        let dequeued = queue
            .dequeue_events(EventType::InvoiceEnqueued, 10)
            .await
            .unwrap();
        assert_eq!(dequeued.len(), 1, "attempt {attempt}");
        let mut e = dequeued.into_iter().next().unwrap();

        if attempt < 2 {
            e.retry_count += 1;
            e.scheduled_at = 0;
            queue.enqueue_event(e).await.unwrap();
        } else {
            queue
                .move_to_dead_letter_queue(&e, "blockhash not found")
                .await
                .unwrap();
        }
    }

    let status = queue.get_queue_status().await.unwrap();
    assert_eq!(status.dead_letter, 1);
    assert_eq!(status.processing, 0);
}

/// Purchase dedup under concurrency.
#[tokio::test]
async fn s5_concurrent_add_purchases_dedupes_to_one() {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(PurchaseCache::new(store));

    let action = PurchaseAction {
        target: Invoice {
            intent_id: "intent-Z".into(),
            owner: String::new(),
            amount: "1".into(),
            origin: "10".into(),
            destinations: vec!["1".into()],
            ticker_hash: String::new(),
            entry_epoch: 0,
            hub_status: HubStatus::Added,
            hub_invoice_enqueued_timestamp: 0,
        },
        purchase: Purchase {
            intent_id: "intent-Z".into(),
            params: serde_json::json!({}),
        },
        transaction_hash: "0xhash".into(),
        transaction_type: None,
        cached_at: 0,
    };

    let mut handles = Vec::new();
    for _ in 0..5 {
        let cache = cache.clone();
        let action = action.clone();
        handles.push(tokio::spawn(async move {
            cache.add_purchases(&[action]).await.unwrap()
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }

    assert_eq!(total, 1);
    assert_eq!(cache.get_all_purchases().await.unwrap().len(), 1);
}

/// DLQ expiry. `move_to_dead_letter_queue` stamps `moved_at = now`, so
/// relative timings (not-yet-expired vs. expired for a given ttl) are
/// reproduced here as "ttl larger than any real elapsed test time" vs.
/// "ttl of 0", which is the boundary the implementation actually branches
/// on.
#[tokio::test]
async fn s6_dlq_entries_expire_only_after_ttl() {
    let store = Arc::new(MemoryStore::new());
    let queue = EventQueue::new(store.clone());

    let e = event("ev-5", 0, 0);
    queue.enqueue_event(e).await.unwrap();
    let dequeued = queue
        .dequeue_events(EventType::InvoiceEnqueued, 10)
        .await
        .unwrap();
    queue
        .move_to_dead_letter_queue(&dequeued[0], "blockhash not found")
        .await
        .unwrap();

    let not_yet_expired = queue
        .cleanup_expired_dead_letter_entries(1_000)
        .await
        .unwrap();
    assert_eq!(not_yet_expired, 0);
    assert_eq!(queue.get_queue_status().await.unwrap().dead_letter, 1);

    let expired = queue.cleanup_expired_dead_letter_entries(0).await.unwrap();
    assert_eq!(expired, 1);
    let status = queue.get_queue_status().await.unwrap();
    assert_eq!(status.dead_letter, 0);
    assert!(
        store
            .hmget("event-queue:data", &["ev-5".to_string()])
            .await
            .unwrap()[0]
            .is_none()
    );
}
