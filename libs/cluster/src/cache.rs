//! Watch-fed local views of cluster state.
//!
//! The cache owns one [`ObjectStore`] per watched kind and drives a watch
//! loop per kind. Each loop iteration opens the watch stream first and then
//! takes a full list, so events arriving during the list buffer in the
//! stream instead of being lost; the list replaces the view wholesale and
//! buffered events reapply on top. A periodic relist heals silent
//! divergence, and stream disconnects reconnect with exponential backoff.
//! Repeated consecutive connect failures surface as an error from `run`;
//! before the first successful sync that is a fatal startup condition.
//!
//! Pod adds and updates are delivered to registered handlers (single-threaded
//! per watch, including list deliveries); handlers must not block.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, trace, warn};

use crate::client::ClusterApi;
use crate::error::ClusterError;
use crate::store::ObjectStore;
use crate::types::{Node, Pod, WatchEvent};

/// Consecutive connect failures before a watch loop gives up.
const MAX_WATCH_FAILURES: u32 = 10;

const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

type PodHandler = Box<dyn Fn(&Pod) + Send + Sync>;

/// Local, eventually-consistent views of pods and nodes.
pub struct ClusterCache {
    client: Arc<dyn ClusterApi>,
    pods: ObjectStore<Pod>,
    nodes: ObjectStore<Node>,
    pod_handlers: RwLock<Vec<PodHandler>>,
    pods_synced: watch::Sender<bool>,
    nodes_synced: watch::Sender<bool>,
    resync_interval: Duration,
}

impl ClusterCache {
    pub fn new(client: Arc<dyn ClusterApi>, resync_interval: Duration) -> Self {
        let (pods_synced, _) = watch::channel(false);
        let (nodes_synced, _) = watch::channel(false);
        Self {
            client,
            pods: ObjectStore::new(),
            nodes: ObjectStore::new(),
            pod_handlers: RwLock::new(Vec::new()),
            pods_synced,
            nodes_synced,
            resync_interval,
        }
    }

    /// The pod view.
    pub fn pods(&self) -> &ObjectStore<Pod> {
        &self.pods
    }

    /// The node view.
    pub fn nodes(&self) -> &ObjectStore<Node> {
        &self.nodes
    }

    /// Register a handler invoked for every pod add or update, including
    /// objects delivered by lists and relists.
    ///
    /// Register handlers before calling [`ClusterCache::run`].
    pub fn on_pod_change(&self, handler: impl Fn(&Pod) + Send + Sync + 'static) {
        self.pod_handlers
            .write()
            .expect("pod handler lock poisoned")
            .push(Box::new(handler));
    }

    /// Wait for the initial sync of both views to complete.
    pub async fn wait_until_synced(&self) {
        wait_flag(&self.pods_synced).await;
        wait_flag(&self.nodes_synced).await;
    }

    /// Drive the watch loops until shutdown.
    ///
    /// Returns an error when a watch fails permanently (which before the
    /// first sync means startup failed); returns `Ok(())` on clean shutdown.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), ClusterError> {
        tokio::try_join!(
            self.pod_watch_loop(shutdown.clone()),
            self.node_watch_loop(shutdown),
        )?;
        Ok(())
    }

    async fn pod_watch_loop(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ClusterError> {
        let mut backoff = Backoff::new(BACKOFF_BASE, BACKOFF_MAX);
        let mut consecutive_failures = 0u32;

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            // Watch first, then list: events racing the list buffer in the
            // stream rather than being dropped.
            let connect = async {
                let events = self.client.watch_pods().await?;
                self.relist_pods().await?;
                Ok::<_, ClusterError>(events)
            };
            let mut events = match connect.await {
                Ok(events) => {
                    consecutive_failures = 0;
                    backoff.reset();
                    if !self.pods_synced.send_replace(true) {
                        info!(pods = self.pods.len(), "pod view synced");
                    }
                    events
                }
                Err(err) => {
                    consecutive_failures += 1;
                    if consecutive_failures >= MAX_WATCH_FAILURES {
                        error!(error = %err, consecutive_failures, "pod watch failed permanently");
                        return Err(self.fatal(&self.pods_synced, err));
                    }
                    warn!(error = %err, consecutive_failures, "pod watch connect failed");
                    if sleep_or_shutdown(backoff.next(), &mut shutdown).await {
                        return Ok(());
                    }
                    continue;
                }
            };

            let mut resync = interval(self.resync_interval);
            resync.tick().await; // first tick fires immediately, skip it

            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => self.apply_pod_event(event),
                        None => {
                            debug!("pod watch stream ended, reconnecting");
                            break;
                        }
                    },
                    _ = resync.tick() => {
                        if let Err(err) = self.relist_pods().await {
                            warn!(error = %err, "pod relist failed, reconnecting");
                            break;
                        }
                    }
                    _ = shutdown.changed() => if *shutdown.borrow() {
                        return Ok(());
                    },
                }
            }
        }
    }

    async fn node_watch_loop(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ClusterError> {
        let mut backoff = Backoff::new(BACKOFF_BASE, BACKOFF_MAX);
        let mut consecutive_failures = 0u32;

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let connect = async {
                let events = self.client.watch_nodes().await?;
                self.relist_nodes().await?;
                Ok::<_, ClusterError>(events)
            };
            let mut events = match connect.await {
                Ok(events) => {
                    consecutive_failures = 0;
                    backoff.reset();
                    if !self.nodes_synced.send_replace(true) {
                        info!(nodes = self.nodes.len(), "node view synced");
                    }
                    events
                }
                Err(err) => {
                    consecutive_failures += 1;
                    if consecutive_failures >= MAX_WATCH_FAILURES {
                        error!(error = %err, consecutive_failures, "node watch failed permanently");
                        return Err(self.fatal(&self.nodes_synced, err));
                    }
                    warn!(error = %err, consecutive_failures, "node watch connect failed");
                    if sleep_or_shutdown(backoff.next(), &mut shutdown).await {
                        return Ok(());
                    }
                    continue;
                }
            };

            let mut resync = interval(self.resync_interval);
            resync.tick().await;

            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => self.apply_node_event(event),
                        None => {
                            debug!("node watch stream ended, reconnecting");
                            break;
                        }
                    },
                    _ = resync.tick() => {
                        if let Err(err) = self.relist_nodes().await {
                            warn!(error = %err, "node relist failed, reconnecting");
                            break;
                        }
                    }
                    _ = shutdown.changed() => if *shutdown.borrow() {
                        return Ok(());
                    },
                }
            }
        }
    }

    /// A permanent failure before the first sync is a startup sync failure.
    fn fatal(&self, synced: &watch::Sender<bool>, err: ClusterError) -> ClusterError {
        if *synced.borrow() {
            err
        } else {
            ClusterError::SyncFailed(err.to_string())
        }
    }

    async fn relist_pods(&self) -> Result<(), ClusterError> {
        let pods = self.client.list_pods().await?;
        self.pods
            .replace_all(pods.iter().map(|pod| (pod.key(), pod.clone())));
        for pod in &pods {
            self.notify_pod(pod);
        }
        debug!(count = pods.len(), "pod relist applied");
        Ok(())
    }

    async fn relist_nodes(&self) -> Result<(), ClusterError> {
        let nodes = self.client.list_nodes().await?;
        self.nodes
            .replace_all(nodes.into_iter().map(|node| (node.name.clone(), node)));
        debug!(count = self.nodes.len(), "node relist applied");
        Ok(())
    }

    fn apply_pod_event(&self, event: WatchEvent<Pod>) {
        match event {
            WatchEvent::Added(pod) | WatchEvent::Modified(pod) => {
                trace!(pod = %pod.key(), "pod upserted");
                self.pods.insert(pod.key(), pod.clone());
                self.notify_pod(&pod);
            }
            WatchEvent::Deleted(pod) => {
                trace!(pod = %pod.key(), "pod removed");
                self.pods.remove(&pod.key());
            }
        }
    }

    fn apply_node_event(&self, event: WatchEvent<Node>) {
        match event {
            WatchEvent::Added(node) | WatchEvent::Modified(node) => {
                trace!(node = %node.name, "node upserted");
                self.nodes.insert(node.name.clone(), node);
            }
            WatchEvent::Deleted(node) => {
                trace!(node = %node.name, "node removed");
                self.nodes.remove(&node.name);
            }
        }
    }

    fn notify_pod(&self, pod: &Pod) {
        let handlers = self.pod_handlers.read().expect("pod handler lock poisoned");
        for handler in handlers.iter() {
            handler(pod);
        }
    }
}

/// Wait for a synced flag to turn true.
async fn wait_flag(flag: &watch::Sender<bool>) {
    let mut rx = flag.subscribe();
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Sleep for `delay`, returning early with `true` if shutdown fires.
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = shutdown.changed() => *shutdown.borrow(),
    }
}

/// Exponential reconnect backoff.
struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.base;
    }
}
