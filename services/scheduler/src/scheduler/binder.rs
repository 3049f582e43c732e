//! Commit step: bind each planned member to its node.

use std::sync::Arc;

use muster_cluster::{Binding, ClusterApi, Pod};
use tracing::info;

use super::error::ScheduleError;

/// Issue one bind per (member, node) pair, sequentially, stopping at the
/// first failure.
///
/// The cluster API has no multi-object transaction, so atomicity lives in
/// the planning layer; a failure here leaves earlier members bound and the
/// rest to be re-driven by a later evaluation. Partially-bound gangs are
/// never rolled back.
pub async fn bind_gang(
    client: &dyn ClusterApi,
    members: &[Arc<Pod>],
    assignments: &[String],
) -> Result<(), ScheduleError> {
    debug_assert_eq!(members.len(), assignments.len());

    for (pod, node_name) in members.iter().zip(assignments) {
        let binding = Binding::to_node(pod, node_name);
        client.bind_pod(&binding).await?;
        info!(pod = %pod.key(), node = %node_name, "bound pod");
    }
    Ok(())
}
