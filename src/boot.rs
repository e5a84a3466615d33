//! Boot and shutdown orchestration. This is the one place an
//! `anyhow::Result` is allowed to carry an arbitrary cause, reserved for
//! exactly this kind of many-fallible-steps sequencing.

use crate::config::AppConfig;
use crate::event_consumer::EventConsumer;
use crate::event_processor::{InvoiceEventProcessor, NoopPlanner, SplitIntentPlanner};
use crate::event_queue::EventQueue;
use crate::kvstore::{KeyValueStore, RedisStore};
use crate::purchase_cache::PurchaseCache;
use crate::scheduler::{BackfillSource, MaintenanceScheduler, NoopBackfillSource};
use crate::shutdown::ShutdownSignal;
use crate::webhook::AppState;
use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{error, info};

/// Everything that needs an orderly teardown on shutdown.
pub struct Application {
    pub config: Arc<AppConfig>,
    pub shutdown: Arc<ShutdownSignal>,
    pub store: Arc<dyn KeyValueStore>,
    pub queue: Arc<EventQueue>,
    pub cache: Arc<PurchaseCache>,
    pub consumer: Arc<EventConsumer>,
    pub scheduler: Arc<MaintenanceScheduler>,
    db_pool: sqlx::PgPool,
}

/// Runs migrations and a connectivity check against Postgres. Concrete
/// migration files are outside this crate's scope; this declares the
/// interface a deployment wires its migration set into.
async fn run_migrations(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .context("database health check failed")?;
    Ok(())
}

impl Application {
    /// Loads config, runs migrations, connects the key-value store, and
    /// wires every component together — but does not yet start the
    /// consumer, scheduler, or HTTP listener.
    pub async fn boot(
        config: Arc<AppConfig>,
        planner: Option<Arc<dyn SplitIntentPlanner>>,
    ) -> anyhow::Result<Self> {
        let db_pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("failed to connect to database")?;
        run_migrations(&db_pool).await?;

        let store: Arc<dyn KeyValueStore> = Arc::new(
            RedisStore::connect(&config.kv_host, config.kv_port, config.kv_connect_timeout)
                .await
                .context("failed to connect to key-value store")?,
        );

        let queue = Arc::new(EventQueue::new(store.clone()));
        let cache = Arc::new(PurchaseCache::new(store.clone()));
        let shutdown = Arc::new(ShutdownSignal::new());

        let planner = planner.unwrap_or_else(|| Arc::new(NoopPlanner));
        let processor = Arc::new(InvoiceEventProcessor::new(cache.clone(), planner));

        let consumer = Arc::new(EventConsumer::new(
            queue.clone(),
            processor,
            config.max_concurrent_events,
            config.polling_interval,
            shutdown.clone(),
        ));

        let backfill: Arc<dyn BackfillSource> = Arc::new(NoopBackfillSource);
        let scheduler = Arc::new(MaintenanceScheduler::new(
            queue.clone(),
            backfill,
            config.polling_interval,
            config.dead_letter_ttl,
            config.event_max_retries,
            shutdown.clone(),
        ));

        Ok(Self {
            config,
            shutdown,
            store,
            queue,
            cache,
            consumer,
            scheduler,
            db_pool,
        })
    }

    /// Starts the consumer, scheduler, and HTTP intake, and blocks until a
    /// shutdown signal (Ctrl-C or SIGTERM) fires. Returns once every
    /// component has finished its graceful drain.
    pub async fn run(self) -> anyhow::Result<()> {
        let state = Arc::new(AppState::new(self.consumer.clone(), self.config.clone()));
        let app = crate::webhook::router(state);

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!(%addr, "HTTP intake listening");

        let consumer = self.consumer.clone();
        let consumer_handle = tokio::spawn(async move {
            if let Err(e) = consumer.run().await {
                error!(error = %e, "consumer loop exited with an error");
            }
        });

        let scheduler = self.scheduler.clone();
        let scheduler_handle = tokio::spawn(async move {
            scheduler.run().await;
        });

        let shutdown = self.shutdown.clone();
        let server = axum::serve(listener, app).with_graceful_shutdown(wait_for_signal(shutdown));
        if let Err(e) = server.await {
            error!(error = %e, "HTTP intake exited with an error");
        }

        self.shutdown.request_shutdown();
        info!("HTTP intake stopped, waiting for consumer and scheduler to drain");

        let _ = tokio::join!(consumer_handle, scheduler_handle);

        self.store.close().await.ok();
        self.db_pool.close().await;
        info!("shutdown complete");
        Ok(())
    }
}

async fn wait_for_signal(shutdown: Arc<ShutdownSignal>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    shutdown.request_shutdown();
}
