//! SalonPass Lifecycle Worker
//!
//! Background service that runs the expiry sweep: `Active` subscriptions
//! whose period ended or quota ran out become `Expired`, and `Suspended`
//! subscriptions past their grace window become `Cancelled`.
//!
//! ## Metrics
//!
//! When `METRICS_ENABLED` is true, Prometheus metrics are served on
//! `0.0.0.0:$METRICS_PORT/metrics`.

mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use salonpass_core::{metrics as engine_metrics, ExpirySweeper, LogNotifier, SystemClock};
use salonpass_db::{create_pool_with_options, run_migrations, Repositories};
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("lifecycle_worker=debug".parse()?)
                .add_directive("salonpass_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting SalonPass lifecycle worker");

    let config = Config::from_env()?;
    tracing::info!(
        sweep_interval_secs = config.lifecycle.sweep_interval.as_secs(),
        sweep_batch_size = config.lifecycle.sweep_batch_size,
        grace_period_hours = config.lifecycle.grace_period.num_hours(),
        "Configuration loaded"
    );

    if config.metrics_enabled {
        setup_metrics(config.metrics_port)?;
    }

    // Database
    let pool = create_pool_with_options(&config.database_url, config.pool.clone()).await?;
    run_migrations(&pool).await?;
    tracing::info!("Database pool created and migrations applied");

    let stores = Repositories::new(pool).into_stores();
    let sweeper = ExpirySweeper::new(
        stores,
        Arc::new(LogNotifier),
        Arc::new(SystemClock),
        config.lifecycle.clone(),
    );

    sweeper.run(shutdown_signal()).await;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn setup_metrics(port: u16) -> anyhow::Result<()> {
    // Sweeps touch up to a batch of rows; redemptions should stay well under 100ms
    let lifecycle_latency_buckets = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0];

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .set_buckets_for_metric(
            Matcher::Full(engine_metrics::OPERATION_DURATION_SECONDS.to_string()),
            lifecycle_latency_buckets,
        )?
        .install()?;

    engine_metrics::describe_metrics();
    tracing::info!(port, "Prometheus exporter listening");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping sweeper");
}
