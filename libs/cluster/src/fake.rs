//! In-memory cluster for tests and local development.
//!
//! `FakeCluster` implements [`ClusterApi`] against a mutable in-memory state:
//! mutations emit the same watch events a real API server would, and bindings
//! are applied to the stored pod (so schedulers observe their own commits
//! through the watch, as they would in production). Bind failures can be
//! injected to exercise partial-commit paths.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::client::ClusterApi;
use crate::error::ClusterError;
use crate::types::{object_key, Binding, Node, Pod, WatchEvent};

const EVENT_BUFFER: usize = 256;

#[derive(Default)]
struct FakeState {
    pods: BTreeMap<String, Pod>,
    nodes: BTreeMap<String, Node>,
    bindings: Vec<Binding>,
    bind_failures: BTreeMap<String, ClusterError>,
}

/// An in-memory cluster API.
pub struct FakeCluster {
    state: Mutex<FakeState>,
    pod_events: broadcast::Sender<WatchEvent<Pod>>,
    node_events: broadcast::Sender<WatchEvent<Node>>,
}

impl FakeCluster {
    pub fn new() -> std::sync::Arc<Self> {
        let (pod_events, _) = broadcast::channel(EVENT_BUFFER);
        let (node_events, _) = broadcast::channel(EVENT_BUFFER);
        std::sync::Arc::new(Self {
            state: Mutex::new(FakeState::default()),
            pod_events,
            node_events,
        })
    }

    /// Create a pod, emitting an added event.
    pub fn add_pod(&self, pod: Pod) {
        {
            let mut state = self.state.lock().expect("fake cluster lock poisoned");
            state.pods.insert(pod.key(), pod.clone());
        }
        let _ = self.pod_events.send(WatchEvent::Added(pod));
    }

    /// Update a pod, emitting a modified event.
    pub fn update_pod(&self, pod: Pod) {
        {
            let mut state = self.state.lock().expect("fake cluster lock poisoned");
            state.pods.insert(pod.key(), pod.clone());
        }
        let _ = self.pod_events.send(WatchEvent::Modified(pod));
    }

    /// Delete a pod, emitting a deleted event if it existed.
    pub fn delete_pod(&self, namespace: &str, name: &str) {
        let removed = {
            let mut state = self.state.lock().expect("fake cluster lock poisoned");
            state.pods.remove(&object_key(namespace, name))
        };
        if let Some(pod) = removed {
            let _ = self.pod_events.send(WatchEvent::Deleted(pod));
        }
    }

    /// Create a node, emitting an added event.
    pub fn add_node(&self, node: Node) {
        {
            let mut state = self.state.lock().expect("fake cluster lock poisoned");
            state.nodes.insert(node.name.clone(), node.clone());
        }
        let _ = self.node_events.send(WatchEvent::Added(node));
    }

    /// Update a node, emitting a modified event.
    pub fn update_node(&self, node: Node) {
        {
            let mut state = self.state.lock().expect("fake cluster lock poisoned");
            state.nodes.insert(node.name.clone(), node.clone());
        }
        let _ = self.node_events.send(WatchEvent::Modified(node));
    }

    /// Current copy of a pod, if present.
    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        let state = self.state.lock().expect("fake cluster lock poisoned");
        state.pods.get(&object_key(namespace, name)).cloned()
    }

    /// All bindings committed so far, in commit order.
    pub fn bindings(&self) -> Vec<Binding> {
        let state = self.state.lock().expect("fake cluster lock poisoned");
        state.bindings.clone()
    }

    /// Queue an error for the next bind of the given pod.
    pub fn fail_bind(&self, namespace: &str, name: &str, error: ClusterError) {
        let mut state = self.state.lock().expect("fake cluster lock poisoned");
        state.bind_failures.insert(object_key(namespace, name), error);
    }

    /// Number of live pod watch subscriptions.
    pub fn pod_watchers(&self) -> usize {
        self.pod_events.receiver_count()
    }

    /// Number of live node watch subscriptions.
    pub fn node_watchers(&self) -> usize {
        self.node_events.receiver_count()
    }

    fn subscribe_pods(&self) -> mpsc::Receiver<WatchEvent<Pod>> {
        bridge(self.pod_events.subscribe())
    }

    fn subscribe_nodes(&self) -> mpsc::Receiver<WatchEvent<Node>> {
        bridge(self.node_events.subscribe())
    }
}

/// Bridge a broadcast subscription into the mpsc receiver the trait returns.
fn bridge<T: Clone + Send + 'static>(
    mut events: broadcast::Receiver<T>,
) -> mpsc::Receiver<T> {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "fake watch subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    rx
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_pods(&self) -> Result<Vec<Pod>, ClusterError> {
        let state = self.state.lock().expect("fake cluster lock poisoned");
        Ok(state.pods.values().cloned().collect())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError> {
        let state = self.state.lock().expect("fake cluster lock poisoned");
        Ok(state.nodes.values().cloned().collect())
    }

    async fn watch_pods(&self) -> Result<mpsc::Receiver<WatchEvent<Pod>>, ClusterError> {
        Ok(self.subscribe_pods())
    }

    async fn watch_nodes(&self) -> Result<mpsc::Receiver<WatchEvent<Node>>, ClusterError> {
        Ok(self.subscribe_nodes())
    }

    async fn bind_pod(&self, binding: &Binding) -> Result<(), ClusterError> {
        let updated = {
            let mut state = self.state.lock().expect("fake cluster lock poisoned");
            let key = binding.pod_key();
            if let Some(error) = state.bind_failures.remove(&key) {
                return Err(error);
            }

            let pod = state
                .pods
                .get_mut(&key)
                .ok_or_else(|| ClusterError::NotFound(key.clone()))?;
            if !pod.spec.node_name.is_empty() {
                return Err(ClusterError::Conflict(format!(
                    "pod {key} is already bound to {}",
                    pod.spec.node_name
                )));
            }

            pod.spec.node_name = binding.target.name.clone();
            let updated = pod.clone();
            state.bindings.push(binding.clone());
            updated
        };
        let _ = self.pod_events.send(WatchEvent::Modified(updated));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BindTarget, ObjectMeta};

    fn pod(namespace: &str, name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                namespace: namespace.to_string(),
                name: name.to_string(),
                uid: format!("uid-{name}"),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn binding(namespace: &str, name: &str, node: &str) -> Binding {
        Binding {
            namespace: namespace.to_string(),
            name: name.to_string(),
            uid: format!("uid-{name}"),
            target: BindTarget {
                kind: "Node".to_string(),
                name: node.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn bind_updates_pod_and_records_binding() {
        let cluster = FakeCluster::new();
        cluster.add_pod(pod("batch", "a"));

        cluster.bind_pod(&binding("batch", "a", "n1")).await.unwrap();

        assert_eq!(cluster.pod("batch", "a").unwrap().spec.node_name, "n1");
        assert_eq!(cluster.bindings().len(), 1);
    }

    #[tokio::test]
    async fn rebind_is_rejected_with_conflict() {
        let cluster = FakeCluster::new();
        cluster.add_pod(pod("batch", "a"));
        cluster.bind_pod(&binding("batch", "a", "n1")).await.unwrap();

        let err = cluster.bind_pod(&binding("batch", "a", "n2")).await;
        assert!(matches!(err, Err(ClusterError::Conflict(_))));
        assert_eq!(cluster.pod("batch", "a").unwrap().spec.node_name, "n1");
    }

    #[tokio::test]
    async fn bind_of_missing_pod_is_not_found() {
        let cluster = FakeCluster::new();
        let err = cluster.bind_pod(&binding("batch", "absent", "n1")).await;
        assert!(matches!(err, Err(ClusterError::NotFound(_))));
    }

    #[tokio::test]
    async fn injected_bind_failure_is_returned_once() {
        let cluster = FakeCluster::new();
        cluster.add_pod(pod("batch", "a"));
        cluster.fail_bind(
            "batch",
            "a",
            ClusterError::Api {
                status: 500,
                message: "boom".to_string(),
            },
        );

        let err = cluster.bind_pod(&binding("batch", "a", "n1")).await;
        assert!(matches!(err, Err(ClusterError::Api { status: 500, .. })));

        cluster.bind_pod(&binding("batch", "a", "n1")).await.unwrap();
        assert_eq!(cluster.bindings().len(), 1);
    }

    #[tokio::test]
    async fn mutations_are_observable_through_watch() {
        let cluster = FakeCluster::new();
        let mut events = cluster.watch_pods().await.unwrap();

        cluster.add_pod(pod("batch", "a"));
        let event = events.recv().await.unwrap();
        assert!(matches!(event, WatchEvent::Added(ref p) if p.key() == "batch/a"));

        cluster.delete_pod("batch", "a");
        let event = events.recv().await.unwrap();
        assert!(matches!(event, WatchEvent::Deleted(ref p) if p.key() == "batch/a"));
    }
}
