//! Test harness for scheduler integration tests.
//!
//! Runs the real scheduler against the in-memory fake cluster and provides
//! pod/node builders plus bounded waits for convergence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use muster_cluster::fake::FakeCluster;
use muster_cluster::types::{
    Binding, ConditionStatus, Container, Node, NodeCondition, NodeConditionKind, ObjectMeta, Pod,
    PodSpec, ResourceQuantity,
};
use muster_scheduler::config::Config;
use muster_scheduler::scheduler::Scheduler;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const SCHEDULER_NAME: &str = "muster-test";
pub const GANG_LABEL: &str = "scheduling.muster.dev/gang";
pub const MIN_AVAILABLE: &str = "scheduling.muster.dev/min-available";

#[allow(dead_code)]
pub const GIB: i64 = 1 << 30;

/// A running scheduler wired to a fake cluster.
pub struct TestScheduler {
    pub cluster: Arc<FakeCluster>,
    shutdown: watch::Sender<bool>,
    run: JoinHandle<anyhow::Result<()>>,
}

/// Start a scheduler with two workers and wait until its watches are live,
/// so subsequent cluster mutations are guaranteed to be observed.
pub async fn start() -> TestScheduler {
    let cluster = FakeCluster::new();
    let config = Config {
        scheduler_name: SCHEDULER_NAME.to_string(),
        gang_label: GANG_LABEL.to_string(),
        min_available_annotation: MIN_AVAILABLE.to_string(),
        credentials_path: None,
        api_url: "http://127.0.0.1:0".to_string(),
        workers: 2,
        resync_interval: Duration::from_secs(30),
    };
    let scheduler = Arc::new(Scheduler::new(config, cluster.clone()));

    let (shutdown, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    let deadline = Instant::now() + Duration::from_secs(5);
    while cluster.pod_watchers() == 0 || cluster.node_watchers() == 0 {
        assert!(Instant::now() < deadline, "scheduler watches never started");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    TestScheduler {
        cluster,
        shutdown,
        run,
    }
}

#[allow(dead_code)]
impl TestScheduler {
    /// Wait until at least `count` bindings have been committed.
    pub async fn wait_for_bindings(&self, count: usize) -> Vec<Binding> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let bindings = self.cluster.bindings();
            if bindings.len() >= count {
                return bindings;
            }
            assert!(
                Instant::now() < deadline,
                "expected {count} bindings, have {}",
                bindings.len()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Give the scheduler time to act, then assert the binding count is
    /// still `baseline`.
    pub async fn assert_no_new_bindings(&self, baseline: usize) {
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(self.cluster.bindings().len(), baseline);
    }

    /// Wait until the named pod is bound, returning its node.
    pub async fn wait_until_bound(&self, namespace: &str, name: &str) -> String {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(pod) = self.cluster.pod(namespace, name) {
                if pod.is_bound() {
                    return pod.spec.node_name;
                }
            }
            assert!(
                Instant::now() < deadline,
                "pod {namespace}/{name} never bound"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Signal shutdown and wait for a clean exit.
    pub async fn stop(self) {
        self.shutdown.send(true).ok();
        self.run
            .await
            .expect("scheduler task panicked")
            .expect("scheduler exited with error");
    }
}

/// A pending pod targeting the test scheduler, optionally gang-labelled.
pub fn gang_pod(
    namespace: &str,
    name: &str,
    gang: Option<&str>,
    cpu_milli: i64,
    memory_bytes: i64,
) -> Pod {
    let mut pod = Pod {
        metadata: ObjectMeta {
            namespace: namespace.to_string(),
            name: name.to_string(),
            uid: format!("uid-{namespace}-{name}"),
            ..Default::default()
        },
        spec: PodSpec {
            scheduler_name: SCHEDULER_NAME.to_string(),
            containers: vec![Container {
                name: "main".to_string(),
                requests: ResourceQuantity::new(cpu_milli, memory_bytes),
            }],
            ..Default::default()
        },
    };
    if let Some(gang) = gang {
        pod.metadata
            .labels
            .insert(GANG_LABEL.to_string(), gang.to_string());
    }
    pod
}

/// Set the min-available annotation on a pod.
#[allow(dead_code)]
pub fn with_min_available(mut pod: Pod, value: &str) -> Pod {
    pod.metadata
        .annotations
        .insert(MIN_AVAILABLE.to_string(), value.to_string());
    pod
}

/// A ready, schedulable node.
pub fn ready_node(name: &str, cpu_milli: i64, memory_bytes: i64) -> Node {
    Node {
        name: name.to_string(),
        allocatable: ResourceQuantity::new(cpu_milli, memory_bytes),
        conditions: vec![NodeCondition {
            kind: NodeConditionKind::Ready,
            status: ConditionStatus::True,
        }],
        ..Default::default()
    }
}
