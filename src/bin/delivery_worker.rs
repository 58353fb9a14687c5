//! Delivery worker binary: connects to Postgres, prepares the pipeline
//! queues and consumes them until interrupted.

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use sunat_sender::keys::ProviderRegistry;
use sunat_sender::models::{PgComponentStore, PgDocumentStore, PgTenantStore};
use sunat_sender::sender::SunatClient;
use sunat_sender::storage::LocalFileStore;
use sunat_sender::{
    DeliveryWorker, DocumentPipeline, EventPublisher, KeyManager, PgmqClient, RetryPolicy,
    SenderConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sunat_sender::logging::init_structured_logging();

    let config = SenderConfig::from_env().context("loading configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("connecting to database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("running migrations")?;

    let queues = PgmqClient::new_with_pool(pool.clone()).await;
    queues.ensure_queues().await.context("preparing queues")?;

    let documents = Arc::new(PgDocumentStore::new(pool.clone()));
    let tenants = Arc::new(PgTenantStore::new(pool.clone()));
    let components = Arc::new(PgComponentStore::new(pool));
    let key_manager = Arc::new(KeyManager::new(components, ProviderRegistry::with_defaults()));
    let files = Arc::new(LocalFileStore::new(&config.storage_dir));
    let bill_service = Arc::new(
        SunatClient::new(Duration::from_secs(config.request_timeout_secs))
            .context("building web service client")?,
    );

    let pipeline = Arc::new(DocumentPipeline::new(
        documents,
        tenants,
        files,
        bill_service,
        key_manager,
        RetryPolicy::new(config.retry_max_attempts),
        EventPublisher::default(),
        Duration::from_secs(config.ticket_check_delay_secs),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = DeliveryWorker::new(pipeline, queues, config.worker.clone(), shutdown_rx);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    worker.run().await;
    Ok(())
}
