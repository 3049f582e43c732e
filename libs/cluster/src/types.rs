//! Object model for the cluster API.
//!
//! Objects delivered by watches are plain data; the scheduler never mutates
//! them in place. All mutation goes through bind operations on the API.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Common object metadata.
///
/// The `(namespace, name)` pair is the object's identity; `uid` is the
/// immutable identity token carried on bindings to prevent rebinding a
/// recreated object of the same name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Set when the object is terminating.
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

/// A CPU/memory pair, in milli-cores and bytes.
///
/// Also used as transient free-capacity state during planning, where values
/// may go negative on overcommitted nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuantity {
    #[serde(default)]
    pub cpu_milli: i64,
    #[serde(default)]
    pub memory_bytes: i64,
}

impl ResourceQuantity {
    pub fn new(cpu_milli: i64, memory_bytes: i64) -> Self {
        Self {
            cpu_milli,
            memory_bytes,
        }
    }

    /// Whether this much free capacity covers `request`.
    pub fn covers(&self, request: &ResourceQuantity) -> bool {
        self.cpu_milli >= request.cpu_milli && self.memory_bytes >= request.memory_bytes
    }

    /// Subtract `request` from this quantity.
    pub fn debit(&mut self, request: &ResourceQuantity) {
        self.cpu_milli -= request.cpu_milli;
        self.memory_bytes -= request.memory_bytes;
    }
}

/// A single container in a pod, carrying its resource request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub requests: ResourceQuantity,
}

/// Pod spec fields the scheduler acts on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodSpec {
    /// Name of the scheduler responsible for this pod.
    #[serde(default)]
    pub scheduler_name: String,
    /// Node the pod is bound to; empty means unbound.
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub containers: Vec<Container>,
}

/// A workload unit, the atom of placement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
}

impl Pod {
    /// The `namespace/name` key used in queues and views.
    pub fn key(&self) -> String {
        object_key(&self.metadata.namespace, &self.metadata.name)
    }

    pub fn is_bound(&self) -> bool {
        !self.spec.node_name.is_empty()
    }

    pub fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Total resource request, summed over containers.
    pub fn request(&self) -> ResourceQuantity {
        let mut total = ResourceQuantity::default();
        for container in &self.spec.containers {
            total.cpu_milli += container.requests.cpu_milli;
            total.memory_bytes += container.requests.memory_bytes;
        }
        total
    }
}

/// Node condition kinds reported by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeConditionKind {
    Ready,
    MemoryPressure,
    DiskPressure,
    NetworkUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCondition {
    pub kind: NodeConditionKind,
    pub status: ConditionStatus,
}

/// A compute host that accepts pod placements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Cordoned nodes accept no new placements.
    #[serde(default)]
    pub unschedulable: bool,
    /// Capacity available to pods, net of system reservations.
    #[serde(default)]
    pub allocatable: ResourceQuantity,
    #[serde(default)]
    pub conditions: Vec<NodeCondition>,
}

impl Node {
    /// Whether the node reports a `Ready` condition with status true.
    ///
    /// Nodes with no readiness condition are treated as not ready.
    pub fn is_ready(&self) -> bool {
        self.conditions
            .iter()
            .find(|c| c.kind == NodeConditionKind::Ready)
            .map(|c| c.status == ConditionStatus::True)
            .unwrap_or(false)
    }
}

/// Target of a bind operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindTarget {
    pub kind: String,
    pub name: String,
}

/// The commit operation assigning a pod to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub namespace: String,
    pub name: String,
    /// Identity token of the pod observed at plan time.
    pub uid: String,
    pub target: BindTarget,
}

impl Binding {
    /// Build a node binding for `pod`.
    pub fn to_node(pod: &Pod, node_name: &str) -> Self {
        Self {
            namespace: pod.metadata.namespace.clone(),
            name: pod.metadata.name.clone(),
            uid: pod.metadata.uid.clone(),
            target: BindTarget {
                kind: "Node".to_string(),
                name: node_name.to_string(),
            },
        }
    }

    pub fn pod_key(&self) -> String {
        object_key(&self.namespace, &self.name)
    }
}

/// One entry of a watch stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "object", rename_all = "snake_case")]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
}

impl<T> WatchEvent<T> {
    pub fn object(&self) -> &T {
        match self {
            WatchEvent::Added(object) | WatchEvent::Modified(object) | WatchEvent::Deleted(object) => {
                object
            }
        }
    }
}

/// Join a namespace and name into a view/queue key.
pub fn object_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Split a `namespace/name` key; `None` if the key is malformed.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    let (namespace, name) = key.split_once('/')?;
    if namespace.is_empty() || name.is_empty() {
        return None;
    }
    Some((namespace, name))
}
