//! Configuration for the scheduler service.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};

/// Label key deriving gang identifiers when none is configured.
pub const DEFAULT_GANG_LABEL: &str = "scheduling.muster.dev/gang";

/// Annotation key overriding the default min-available when none is configured.
pub const DEFAULT_MIN_AVAILABLE_ANNOTATION: &str = "scheduling.muster.dev/min-available";

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Matched against each pod's scheduler-name field; pods naming a
    /// different scheduler are ignored.
    pub scheduler_name: String,

    /// Label key whose value identifies gang membership.
    pub gang_label: String,

    /// Annotation key read on gang members for the min-available override.
    pub min_available_annotation: String,

    /// Path to a cluster credentials file; `None` means in-cluster defaults.
    pub credentials_path: Option<PathBuf>,

    /// Cluster API base URL used when no credentials file is given.
    pub api_url: String,

    /// Number of worker tasks draining the queue.
    pub workers: usize,

    /// Interval between full view relists.
    pub resync_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// A missing scheduler name is a startup error: without it, every pod in
    /// the cluster would be ignored.
    pub fn from_env() -> Result<Self> {
        let scheduler_name = std::env::var("MUSTER_SCHEDULER_NAME").unwrap_or_default();
        if scheduler_name.is_empty() {
            bail!("MUSTER_SCHEDULER_NAME is required");
        }

        let gang_label = std::env::var("MUSTER_GANG_LABEL")
            .unwrap_or_else(|_| DEFAULT_GANG_LABEL.to_string());

        let min_available_annotation = std::env::var("MUSTER_MIN_AVAILABLE_ANNOTATION")
            .unwrap_or_else(|_| DEFAULT_MIN_AVAILABLE_ANNOTATION.to_string());

        let credentials_path = std::env::var("MUSTER_CREDENTIALS")
            .ok()
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);

        let api_url = std::env::var("MUSTER_API_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:7070".to_string());

        let workers = std::env::var("MUSTER_WORKERS")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(1usize)
            .max(1);

        let resync_interval_secs = std::env::var("MUSTER_RESYNC_INTERVAL_SECS")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(30u64)
            .max(1);

        Ok(Self {
            scheduler_name,
            gang_label,
            min_available_annotation,
            credentials_path,
            api_url,
            workers,
            resync_interval: Duration::from_secs(resync_interval_secs),
        })
    }
}
