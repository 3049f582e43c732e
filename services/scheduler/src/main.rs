//! muster scheduler
//!
//! A gang-style batch scheduler: pods naming this scheduler are grouped into
//! gangs by label and bound to nodes all-or-nothing per dispatch cycle, so
//! batch and ML workloads never start a partial set of ranks that deadlocks
//! waiting for peers.

use std::sync::Arc;

use anyhow::Result;
use muster_cluster::{Credentials, RestClient};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use muster_scheduler::config::Config;
use muster_scheduler::scheduler::Scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting muster scheduler");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        scheduler_name = %config.scheduler_name,
        api_url = %config.api_url,
        workers = config.workers,
        "Configuration loaded"
    );

    // Build the cluster API client
    let credentials = Credentials::resolve(config.credentials_path.as_deref(), &config.api_url)?;
    let client = Arc::new(RestClient::new(credentials)?);

    let scheduler = Arc::new(Scheduler::new(config, client));

    // Propagate ctrl-c as a clean shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    if let Err(err) = scheduler.run(shutdown_rx).await {
        error!(error = %err, "scheduler exited with error");
        return Err(err);
    }

    Ok(())
}
