//! The gang-aware scheduling loop.
//!
//! Control flow: the cluster watch delivers pod events to a handler that
//! enqueues keys for pods targeting this scheduler; workers pull keys from
//! the queue, re-read the pod from the view, assemble its gang, apply the
//! min-available gate, plan placements against per-attempt free capacity,
//! and drive the binder over each member. Failures become rate-limited
//! requeues.

mod binder;
mod error;
mod gang;
mod planner;
mod worker;

use std::sync::Arc;

use muster_cluster::{ClusterApi, ClusterCache};
use muster_workqueue::Workqueue;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::config::Config;

pub use error::{Disposition, ScheduleError};

/// A gang-style batch scheduler.
///
/// One instance is active per cluster; high availability is delegated to an
/// external lease gating [`Scheduler::run`]. The scheduler holds no state
/// that survives restarts.
pub struct Scheduler {
    config: Config,
    client: Arc<dyn ClusterApi>,
    cache: Arc<ClusterCache>,
    queue: Arc<Workqueue>,
}

impl Scheduler {
    pub fn new(config: Config, client: Arc<dyn ClusterApi>) -> Self {
        let cache = Arc::new(ClusterCache::new(
            Arc::clone(&client),
            config.resync_interval,
        ));
        Self {
            config,
            client,
            cache,
            queue: Arc::new(Workqueue::new()),
        }
    }

    /// Run the scheduler until shutdown is signaled.
    ///
    /// Blocks until the views complete their initial sync, then serves the
    /// queue with worker tasks. Returns an error if the sync fails, a watch
    /// fails permanently, or the watch task dies; returns `Ok(())` on clean
    /// shutdown.
    pub async fn run(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        info!(
            scheduler = %self.config.scheduler_name,
            gang_label = %self.config.gang_label,
            "starting scheduler"
        );

        // Enqueue pending pods on every add or update, including initial sync.
        {
            let queue = Arc::clone(&self.queue);
            let scheduler_name = self.config.scheduler_name.clone();
            self.cache.on_pod_change(move |pod| {
                if pod.spec.scheduler_name == scheduler_name
                    && !pod.is_bound()
                    && !pod.is_terminating()
                {
                    queue.add(&pod.key());
                }
            });
        }

        let mut cache_task = {
            let cache = Arc::clone(&self.cache);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { cache.run(shutdown).await })
        };

        // Wait for the views, bailing out if the cache exits first.
        tokio::select! {
            _ = self.cache.wait_until_synced() => {}
            result = &mut cache_task => {
                self.queue.shut_down();
                result??;
                return Ok(());
            }
        }

        let mut workers = Vec::with_capacity(self.config.workers);
        for worker_id in 0..self.config.workers {
            let scheduler = Arc::clone(&self);
            workers.push(tokio::spawn(worker::run(scheduler, worker_id)));
        }
        info!(workers = workers.len(), "scheduler ready");

        let result = tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => {
                info!("shutdown signaled, draining workers");
                self.queue.shut_down();
                cache_task.await
            }
            result = &mut cache_task => {
                self.queue.shut_down();
                result
            }
        };

        for (worker_id, worker) in workers.into_iter().enumerate() {
            if let Err(err) = worker.await {
                warn!(worker_id, error = %err, "worker task terminated abnormally");
            }
        }

        result??;
        Ok(())
    }

    /// Evaluate one pod key: the full assemble → gate → plan → bind cycle.
    #[instrument(skip(self, key), fields(pod = %key))]
    async fn schedule_key(&self, key: &str) -> Result<(), ScheduleError> {
        let Some(pod) = self.cache.pods().get(key) else {
            return Err(ScheduleError::PodGone(key.to_string()));
        };
        if pod.spec.scheduler_name != self.config.scheduler_name {
            return Ok(());
        }
        // Bound or terminating pods need nothing from us; re-enqueued keys
        // for already-bound pods fall out here as no-ops.
        if pod.is_bound() || pod.is_terminating() {
            return Ok(());
        }

        let gang_name = gang::gang_id(&pod, &self.config.gang_label).to_string();
        let members = gang::assemble(
            self.cache.pods(),
            &pod,
            &self.config.scheduler_name,
            &self.config.gang_label,
        );
        if members.is_empty() {
            return Ok(());
        }

        let min_available = gang::min_available(&members, &self.config.min_available_annotation);
        let unbound = gang::unbound_members(&members);
        if unbound.is_empty() {
            return Ok(());
        }
        let bound = members.len() - unbound.len();
        if !gang::gate_passes(unbound.len(), bound, min_available) {
            return Err(ScheduleError::GangNotReady {
                gang: gang_name,
                need: min_available,
                have: unbound.len(),
            });
        }

        let nodes = self.cache.nodes().list();
        let pods = self.cache.pods().list();
        let free = planner::free_capacity(&nodes, &pods);
        let assignments = planner::plan(&unbound, free)?;

        binder::bind_gang(self.client.as_ref(), &unbound, &assignments).await?;
        info!(gang = %gang_name, members = unbound.len(), "gang scheduled");
        Ok(())
    }
}

/// Wait for the shutdown channel to turn true (or its sender to drop).
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
