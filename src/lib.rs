//! Event-driven invoice-processing core for the Mark cross-chain
//! settlement agent: a durable typed event queue, a bounded-concurrency
//! consumer, a purchase cache enforcing at-most-one-fulfillment-per-invoice,
//! and a maintenance scheduler, orchestrated by a boot/shutdown sequencer.

pub mod backoff;
pub mod boot;
pub mod config;
pub mod domain;
pub mod event_consumer;
pub mod event_processor;
pub mod event_queue;
pub mod kvstore;
pub mod logging;
pub mod purchase_cache;
pub mod scheduler;
pub mod shutdown;
pub mod webhook;

pub use boot::Application;
pub use config::AppConfig;
