//! services/worker/src/bin/worker.rs

use std::sync::Arc;

use auto_apply_core::{AutoApplyService, EnginePorts};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use worker_lib::{
    adapters::{PgApplicationAdapter, PgFailureLogger, PgJobSearchAdapter, PgStore},
    config::Config,
    error::WorkerError,
    scheduler::Scheduler,
};

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting worker...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(PgStore::new(db_pool.clone()));
    info!("Running database migrations...");
    store.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Wire the Engine ---
    let ports = EnginePorts {
        configs: store.clone(),
        activity: store.clone(),
        queue: store.clone(),
        rate_limits: store.clone(),
        profiles: store,
        job_search: Arc::new(PgJobSearchAdapter::new(db_pool.clone())),
        job_application: Arc::new(PgApplicationAdapter::new(db_pool.clone())),
        failure_logger: Arc::new(PgFailureLogger::new(db_pool.clone())),
    };
    let service = AutoApplyService::new(
        ports,
        config.rate_limits.clone(),
        config.orchestrator.clone(),
    );

    if config.run_once {
        let summary = service.run_cycle().await;
        info!(
            cycle_id = %summary.cycle_id,
            processed = summary.configs_processed,
            failed = summary.failed,
            "Single cycle finished."
        );
        // Machine-readable summary for cron wrappers.
        println!("{}", serde_json::to_string(&summary)?);
        db_pool.close().await;
        return Ok(());
    }

    // --- 4. Run the Scheduler until Ctrl-C ---
    let shutdown = CancellationToken::new();
    let scheduler = Scheduler::new(service, config.cycle_interval, shutdown.clone());
    let mut handle = tokio::spawn(async move { scheduler.run().await });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown requested, waiting for the current cycle to finish...");
            shutdown.cancel();
            if let Err(e) = (&mut handle).await {
                error!("Scheduler task failed: {}", e);
            }
        }
        joined = &mut handle => {
            if let Err(e) = joined {
                error!("Scheduler task failed: {}", e);
            }
        }
    }

    db_pool.close().await;
    info!("Worker stopped.");
    Ok(())
}
