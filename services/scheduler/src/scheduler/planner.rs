//! Free-capacity accounting and all-or-nothing gang placement.
//!
//! The free-capacity map is rebuilt from the views on every attempt and
//! discarded at its end: the scheduler carries no reservation ledger across
//! attempts, so there is nothing to drift when events are missed. Within one
//! attempt the map is walked in node-name order, so placement is
//! deterministic for a given view snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use muster_cluster::{Node, Pod, ResourceQuantity};
use tracing::debug;

use super::error::ScheduleError;

/// Compute per-node free capacity for one planning attempt.
///
/// Free capacity is allocatable minus the summed requests of pods currently
/// assigned to the node, across all namespaces. Nodes that are not ready or
/// are cordoned are excluded. Overcommitted nodes may go negative; they
/// simply never fit.
pub fn free_capacity(
    nodes: &[Arc<Node>],
    pods: &[Arc<Pod>],
) -> BTreeMap<String, ResourceQuantity> {
    let mut free: BTreeMap<String, ResourceQuantity> = nodes
        .iter()
        .filter(|node| node.is_ready() && !node.unschedulable)
        .map(|node| (node.name.clone(), node.allocatable))
        .collect();

    for pod in pods {
        if pod.spec.node_name.is_empty() {
            continue;
        }
        if let Some(state) = free.get_mut(&pod.spec.node_name) {
            state.debit(&pod.request());
        }
    }

    free
}

/// Assign one node per member, first-fit in node-name order.
///
/// Each assignment debits the node's transient state so later members see
/// the gang's own consumption. If any member finds no node the whole attempt
/// fails and every tentative assignment is discarded; no partial plans.
pub fn plan(
    members: &[Arc<Pod>],
    mut free: BTreeMap<String, ResourceQuantity>,
) -> Result<Vec<String>, ScheduleError> {
    if free.is_empty() {
        return Err(ScheduleError::NoSchedulableNodes);
    }

    let mut assignments = Vec::with_capacity(members.len());
    for pod in members {
        let request = pod.request();
        let Some((name, state)) = free.iter_mut().find(|(_, state)| state.covers(&request)) else {
            return Err(ScheduleError::NoFeasibleNode(pod.key()));
        };
        state.debit(&request);
        debug!(
            pod = %pod.key(),
            node = %name,
            cpu_milli = request.cpu_milli,
            memory_bytes = request.memory_bytes,
            "planned assignment"
        );
        assignments.push(name.clone());
    }

    Ok(assignments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_cluster::types::{
        ConditionStatus, Container, NodeCondition, NodeConditionKind, ObjectMeta, PodSpec,
    };

    fn ready_node(name: &str, cpu_milli: i64, memory_bytes: i64) -> Arc<Node> {
        Arc::new(Node {
            name: name.to_string(),
            allocatable: ResourceQuantity::new(cpu_milli, memory_bytes),
            conditions: vec![NodeCondition {
                kind: NodeConditionKind::Ready,
                status: ConditionStatus::True,
            }],
            ..Default::default()
        })
    }

    fn pod(name: &str, cpu_milli: i64, memory_bytes: i64, node_name: &str) -> Arc<Pod> {
        Arc::new(Pod {
            metadata: ObjectMeta {
                namespace: "batch".to_string(),
                name: name.to_string(),
                ..Default::default()
            },
            spec: PodSpec {
                node_name: node_name.to_string(),
                containers: vec![Container {
                    name: "main".to_string(),
                    requests: ResourceQuantity::new(cpu_milli, memory_bytes),
                }],
                ..Default::default()
            },
        })
    }

    const GIB: i64 = 1 << 30;

    #[test]
    fn free_capacity_subtracts_assigned_pods() {
        let nodes = vec![ready_node("n1", 2000, 4 * GIB)];
        let pods = vec![
            pod("assigned", 500, GIB, "n1"),
            pod("pending", 500, GIB, ""),
            pod("elsewhere", 500, GIB, "n2"),
        ];

        let free = free_capacity(&nodes, &pods);
        assert_eq!(free["n1"], ResourceQuantity::new(1500, 3 * GIB));
    }

    #[test]
    fn free_capacity_excludes_unready_and_cordoned_nodes() {
        let ready = ready_node("ready", 2000, 4 * GIB);
        let unready = Arc::new(Node {
            name: "unready".to_string(),
            allocatable: ResourceQuantity::new(2000, 4 * GIB),
            ..Default::default()
        });
        let mut cordoned = (*ready_node("cordoned", 2000, 4 * GIB)).clone();
        cordoned.unschedulable = true;

        let free = free_capacity(&[ready, unready, Arc::new(cordoned)], &[]);
        assert_eq!(free.len(), 1);
        assert!(free.contains_key("ready"));
    }

    #[test]
    fn plan_packs_first_fit_in_name_order() {
        // Three 500m/512Mi members onto two 2000m/4Gi nodes: first-fit puts
        // all three on the first node.
        let members = vec![
            pod("g1-0", 500, GIB / 2, ""),
            pod("g1-1", 500, GIB / 2, ""),
            pod("g1-2", 500, GIB / 2, ""),
        ];
        let free = free_capacity(
            &[ready_node("n1", 2000, 4 * GIB), ready_node("n2", 2000, 4 * GIB)],
            &[],
        );

        let assignments = plan(&members, free).unwrap();
        assert_eq!(assignments, ["n1", "n1", "n1"]);
    }

    #[test]
    fn plan_spills_to_next_node_when_first_fills() {
        let members = vec![
            pod("g1-0", 1500, GIB, ""),
            pod("g1-1", 1500, GIB, ""),
        ];
        let free = free_capacity(
            &[ready_node("n1", 2000, 4 * GIB), ready_node("n2", 2000, 4 * GIB)],
            &[],
        );

        let assignments = plan(&members, free).unwrap();
        assert_eq!(assignments, ["n1", "n2"]);
    }

    #[test]
    fn plan_fails_whole_gang_when_any_member_does_not_fit() {
        // Four 1500m members on two 2000m nodes: the third has nowhere to go.
        let members = vec![
            pod("g1-0", 1500, GIB, ""),
            pod("g1-1", 1500, GIB, ""),
            pod("g1-2", 1500, GIB, ""),
            pod("g1-3", 1500, GIB, ""),
        ];
        let free = free_capacity(
            &[ready_node("n1", 2000, 8 * GIB), ready_node("n2", 2000, 8 * GIB)],
            &[],
        );

        let err = plan(&members, free).unwrap_err();
        assert!(matches!(err, ScheduleError::NoFeasibleNode(ref key) if key == "batch/g1-2"));
    }

    #[test]
    fn plan_with_no_schedulable_nodes_fails() {
        let members = vec![pod("g1-0", 100, GIB, "")];
        let err = plan(&members, BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ScheduleError::NoSchedulableNodes));
    }

    #[test]
    fn plan_accounts_for_existing_load() {
        // n1 already runs 1600m of pods, so a 500m member lands on n2.
        let members = vec![pod("g1-0", 500, GIB / 2, "")];
        let free = free_capacity(
            &[ready_node("n1", 2000, 4 * GIB), ready_node("n2", 2000, 4 * GIB)],
            &[pod("running", 1600, GIB, "n1")],
        );

        let assignments = plan(&members, free).unwrap();
        assert_eq!(assignments, ["n2"]);
    }
}
