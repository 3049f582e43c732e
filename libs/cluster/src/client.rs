//! The client seam between the scheduler and the cluster API.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ClusterError;
use crate::types::{Binding, Node, Pod, WatchEvent};

/// Operations the scheduler performs against the cluster API.
///
/// Watch receivers deliver events until the underlying stream disconnects,
/// then close; callers re-establish the watch (the cache does this with
/// backoff). Implementations: [`crate::rest::RestClient`] for a real cluster,
/// [`crate::fake::FakeCluster`] for tests.
#[async_trait]
pub trait ClusterApi: Send + Sync + 'static {
    /// Full list of pods across all namespaces.
    async fn list_pods(&self) -> Result<Vec<Pod>, ClusterError>;

    /// Full list of nodes.
    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError>;

    /// Open a pod watch stream.
    async fn watch_pods(&self) -> Result<mpsc::Receiver<WatchEvent<Pod>>, ClusterError>;

    /// Open a node watch stream.
    async fn watch_nodes(&self) -> Result<mpsc::Receiver<WatchEvent<Node>>, ClusterError>;

    /// Commit one pod-to-node assignment.
    ///
    /// The server rejects bindings for pods that are already bound
    /// ([`ClusterError::Conflict`]) or gone ([`ClusterError::NotFound`]).
    async fn bind_pod(&self, binding: &Binding) -> Result<(), ClusterError>;
}
