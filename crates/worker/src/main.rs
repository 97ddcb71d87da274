//! `vigil-worker` — check-result reconciler daemon.
//!
//! Consumes check observations from the results queue, merges each one
//! into its check's state under a row-locked transaction, persists the
//! full result to the key-value store, and publishes transition
//! notifications for confirmed state changes.
//!
//! # Environment variables
//!
//! | Variable                     | Required | Default             | Description                                  |
//! |------------------------------|----------|---------------------|----------------------------------------------|
//! | `VIGIL_POSTGRES_URL`         | yes      | --                  | Relational store connection string           |
//! | `VIGIL_RESULTS_QUEUE_URL`    | yes      | --                  | Results queue consumed by the SQS transport  |
//! | `VIGIL_ALERTS_QUEUE_URL`     | no       | (disabled)          | Transition-notification queue                |
//! | `VIGIL_TOPIC`                | no       | `checks.results`    | Results topic name                           |
//! | `VIGIL_CHANNEL`              | no       | `result-reconciler` | Consumer-group name                          |
//! | `VIGIL_LOOKUPD_ADDRESSES`    | no       | (empty)             | Comma-separated queue discovery addresses    |
//! | `VIGIL_MAX_TASKS`            | no       | `4`                 | Maximum concurrent in-flight handlers        |
//! | `VIGIL_DB_MAX_CONNECTIONS`   | no       | `20`                | Relational connection-pool size              |
//! | `VIGIL_REGION`               | no       | ambient             | AWS region override                          |
//! | `VIGIL_BASTION_DIRECTORY_URL`| no       | (disabled)          | Legacy bastion directory (feature-gated)     |
//! | `VIGIL_LOG_LEVEL`            | no       | `info`              | Tracing filter directive                     |

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil_results::DynamoResultStore;
use vigil_worker::config::Config;
use vigil_worker::consumer::{Consumer, ResultHandler};
#[cfg(feature = "legacy-bastions")]
use vigil_worker::directory::BastionDirectory;
use vigil_worker::hooks::build_registry;
use vigil_worker::notifier::AlertPublisher;
use vigil_worker::reconciler::Reconciler;
use vigil_worker::transport::SqsSource;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let log_directive =
        std::env::var("VIGIL_LOG_LEVEL").unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_new(&log_directive)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(error = %error, "Invalid configuration");
            std::process::exit(1);
        }
    };

    let Some(results_queue_url) = config.results_queue_url.clone() else {
        tracing::error!("VIGIL_RESULTS_QUEUE_URL is required");
        std::process::exit(1);
    };

    let pool =
        match vigil_db::create_pool(&config.postgres_url, config.db_max_connections).await {
            Ok(pool) => pool,
            Err(error) => {
                tracing::error!(error = %error, "Cannot connect to database");
                std::process::exit(1);
            }
        };
    if let Err(error) = vigil_db::health_check(&pool).await {
        tracing::error!(error = %error, "Database health check failed");
        std::process::exit(1);
    }

    let results = Arc::new(DynamoResultStore::from_env(config.region.clone(), None).await);

    let alerts = match config.alerts_queue_url.clone() {
        Some(queue_url) => {
            let (sender, publisher) =
                AlertPublisher::connect(config.region.clone(), queue_url).await;
            tokio::spawn(publisher.run());
            Some(sender)
        }
        None => {
            tracing::warn!("No alerts queue URL configured, notifications disabled");
            None
        }
    };

    let hooks = Arc::new(build_registry(alerts));
    let reconciler = Reconciler::new(pool, results, hooks);

    #[cfg(feature = "legacy-bastions")]
    let reconciler = match config.bastion_directory_url.clone() {
        Some(url) => reconciler.with_directory(BastionDirectory::new(url)),
        None => reconciler,
    };

    let handler: Arc<dyn ResultHandler> = Arc::new(reconciler);

    let source = SqsSource::connect(config.region.clone(), results_queue_url).await;
    let consumer = Consumer::new(config.consumer(), source);

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    tracing::info!("vigil-worker started");
    consumer.run(handler, shutdown).await;
    tracing::info!("Shutdown complete");
}

/// Cancel the token on SIGINT or SIGTERM.
fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        tracing::info!("Stop signal received");
        shutdown.cancel();
    });
}
