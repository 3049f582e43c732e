//! Gang assembly and the min-available readiness gate.
//!
//! Gangs are derived, never stored: every attempt re-reads membership from
//! the pod view, so there is no gang registry to keep consistent with pod
//! reality.

use std::sync::Arc;

use muster_cluster::{ObjectStore, Pod};

/// The gang identifier for a pod: its gang-label value, or its own name for
/// unlabelled pods (which form singleton gangs).
pub fn gang_id<'a>(pod: &'a Pod, gang_label: &str) -> &'a str {
    pod.metadata
        .labels
        .get(gang_label)
        .map(String::as_str)
        .unwrap_or(&pod.metadata.name)
}

/// Assemble the gang the triggering pod belongs to.
///
/// Members share the trigger's namespace and gang-label value and name this
/// scheduler; both bound and unbound members are included so the gate sees
/// the true gang size. Terminating pods are excluded entirely: they count
/// neither toward the gang size nor toward unbound members. Members are
/// returned in name order so planning is deterministic within an attempt.
pub fn assemble(
    pods: &ObjectStore<Pod>,
    trigger: &Arc<Pod>,
    scheduler_name: &str,
    gang_label: &str,
) -> Vec<Arc<Pod>> {
    match trigger.metadata.labels.get(gang_label) {
        Some(gang_id) => {
            let mut members = pods.select(|pod| {
                pod.metadata.namespace == trigger.metadata.namespace
                    && pod.metadata.labels.get(gang_label) == Some(gang_id)
                    && pod.spec.scheduler_name == scheduler_name
                    && !pod.is_terminating()
            });
            members.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
            members
        }
        None => {
            if trigger.spec.scheduler_name == scheduler_name && !trigger.is_terminating() {
                vec![Arc::clone(trigger)]
            } else {
                Vec::new()
            }
        }
    }
}

/// Resolve the effective min-available for a gang.
///
/// The value comes from the first member carrying the annotation and parses
/// as either a bare count (`"3"`) or a percentage of the gang size (`"60%"`,
/// rounded up). Values below 1, above the gang size, or unparseable collapse
/// to the full gang size: no valid override means "require all members".
pub fn min_available(gang: &[Arc<Pod>], annotation: &str) -> usize {
    let size = gang.len();
    if size == 0 {
        return 0;
    }

    let Some(value) = gang
        .iter()
        .find_map(|pod| pod.metadata.annotations.get(annotation))
    else {
        return size;
    };

    let Some(resolved) = parse_count_or_percent(value, size) else {
        return size;
    };
    if resolved < 1 || resolved > size as i64 {
        size
    } else {
        resolved as usize
    }
}

/// Parse a count (`"3"`) or percentage (`"60%"`) against `total`.
/// Percentages round up to the nearest whole member.
fn parse_count_or_percent(value: &str, total: usize) -> Option<i64> {
    let value = value.trim();
    if let Some(percent) = value.strip_suffix('%') {
        let percent: i64 = percent.trim().parse().ok()?;
        if percent < 0 {
            return None;
        }
        Some((percent * total as i64 + 99) / 100)
    } else {
        value.parse().ok()
    }
}

/// The members still awaiting placement.
pub fn unbound_members(gang: &[Arc<Pod>]) -> Vec<Arc<Pod>> {
    gang.iter()
        .filter(|pod| !pod.is_bound())
        .cloned()
        .collect()
}

/// Whether the gang may be dispatched.
///
/// Passes when enough unbound members exist to start together, or when the
/// already-bound members alone satisfy the minimum; in that case the gang's
/// requirement is already met and stragglers are placed incrementally.
pub fn gate_passes(unbound: usize, bound: usize, min_available: usize) -> bool {
    unbound >= min_available || bound >= min_available
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_cluster::types::ObjectMeta;

    fn member(name: &str, gang: Option<&str>, scheduler: &str) -> Arc<Pod> {
        let mut pod = Pod {
            metadata: ObjectMeta {
                namespace: "batch".to_string(),
                name: name.to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        pod.spec.scheduler_name = scheduler.to_string();
        if let Some(gang) = gang {
            pod.metadata
                .labels
                .insert(GANG_LABEL.to_string(), gang.to_string());
        }
        Arc::new(pod)
    }

    fn with_annotation(pod: &Arc<Pod>, value: &str) -> Arc<Pod> {
        let mut pod = (**pod).clone();
        pod.metadata
            .annotations
            .insert(MIN_AVAILABLE.to_string(), value.to_string());
        Arc::new(pod)
    }

    const GANG_LABEL: &str = "scheduling.muster.dev/gang";
    const MIN_AVAILABLE: &str = "scheduling.muster.dev/min-available";
    const SCHEDULER: &str = "muster";

    fn store(pods: &[Arc<Pod>]) -> ObjectStore<Pod> {
        let store = ObjectStore::new();
        for pod in pods {
            store.insert(pod.key(), (**pod).clone());
        }
        store
    }

    #[test]
    fn labelled_pods_assemble_by_namespace_and_label() {
        let a = member("g1-0", Some("g1"), SCHEDULER);
        let b = member("g1-1", Some("g1"), SCHEDULER);
        let other_gang = member("g2-0", Some("g2"), SCHEDULER);
        let other_scheduler = member("g1-2", Some("g1"), "someone-else");
        let pods = store(&[a.clone(), b.clone(), other_gang, other_scheduler]);

        let gang = assemble(&pods, &a, SCHEDULER, GANG_LABEL);
        let names: Vec<_> = gang.iter().map(|p| p.metadata.name.as_str()).collect();
        assert_eq!(names, ["g1-0", "g1-1"]);
    }

    #[test]
    fn unlabelled_pod_is_a_singleton_gang() {
        let solo = member("solo", None, SCHEDULER);
        let pods = store(&[solo.clone()]);

        let gang = assemble(&pods, &solo, SCHEDULER, GANG_LABEL);
        assert_eq!(gang.len(), 1);
        assert_eq!(gang_id(&solo, GANG_LABEL), "solo");
    }

    #[test]
    fn terminating_members_are_excluded() {
        let a = member("g1-0", Some("g1"), SCHEDULER);
        let mut doomed = (*member("g1-1", Some("g1"), SCHEDULER)).clone();
        doomed.metadata.deletion_timestamp = Some(chrono::Utc::now());
        let pods = store(&[a.clone(), Arc::new(doomed)]);

        let gang = assemble(&pods, &a, SCHEDULER, GANG_LABEL);
        assert_eq!(gang.len(), 1);
    }

    #[test]
    fn min_available_defaults_to_gang_size() {
        let gang = vec![
            member("g1-0", Some("g1"), SCHEDULER),
            member("g1-1", Some("g1"), SCHEDULER),
            member("g1-2", Some("g1"), SCHEDULER),
        ];
        assert_eq!(min_available(&gang, MIN_AVAILABLE), 3);
    }

    #[test]
    fn min_available_parses_integer_form() {
        let mut gang = vec![
            member("g1-0", Some("g1"), SCHEDULER),
            member("g1-1", Some("g1"), SCHEDULER),
            member("g1-2", Some("g1"), SCHEDULER),
        ];
        gang[0] = with_annotation(&gang[0], "2");
        assert_eq!(min_available(&gang, MIN_AVAILABLE), 2);
    }

    #[test]
    fn min_available_parses_percentage_form_rounding_up() {
        let mut gang = vec![
            member("g1-0", Some("g1"), SCHEDULER),
            member("g1-1", Some("g1"), SCHEDULER),
            member("g1-2", Some("g1"), SCHEDULER),
        ];
        // 50% of 3 = 1.5, rounded up to 2.
        gang[0] = with_annotation(&gang[0], "50%");
        assert_eq!(min_available(&gang, MIN_AVAILABLE), 2);

        gang[0] = with_annotation(&gang[0], "100%");
        assert_eq!(min_available(&gang, MIN_AVAILABLE), 3);
    }

    #[test]
    fn min_available_clamps_out_of_range_values() {
        let mut gang = vec![
            member("g1-0", Some("g1"), SCHEDULER),
            member("g1-1", Some("g1"), SCHEDULER),
        ];
        gang[0] = with_annotation(&gang[0], "0");
        assert_eq!(min_available(&gang, MIN_AVAILABLE), 2);

        gang[0] = with_annotation(&gang[0], "5");
        assert_eq!(min_available(&gang, MIN_AVAILABLE), 2);

        gang[0] = with_annotation(&gang[0], "0%");
        assert_eq!(min_available(&gang, MIN_AVAILABLE), 2);

        gang[0] = with_annotation(&gang[0], "not-a-number");
        assert_eq!(min_available(&gang, MIN_AVAILABLE), 2);
    }

    #[test]
    fn min_available_reads_first_annotated_member() {
        let mut gang = vec![
            member("g1-0", Some("g1"), SCHEDULER),
            member("g1-1", Some("g1"), SCHEDULER),
            member("g1-2", Some("g1"), SCHEDULER),
        ];
        gang[1] = with_annotation(&gang[1], "1");
        assert_eq!(min_available(&gang, MIN_AVAILABLE), 1);
    }

    #[test]
    fn gate_requires_min_unbound_or_min_bound() {
        // A half-bound gang with default min defers.
        assert!(!gate_passes(1, 1, 2));
        // Enough unbound members to start together.
        assert!(gate_passes(2, 0, 2));
        // Requirement already satisfied by running members; straggler joins.
        assert!(gate_passes(1, 2, 2));
    }

    #[test]
    fn unbound_members_filters_bound() {
        let a = member("g1-0", Some("g1"), SCHEDULER);
        let mut bound = (*member("g1-1", Some("g1"), SCHEDULER)).clone();
        bound.spec.node_name = "n1".to_string();
        let gang = vec![a, Arc::new(bound)];
        let unbound = unbound_members(&gang);
        assert_eq!(unbound.len(), 1);
        assert_eq!(unbound[0].metadata.name, "g1-0");
    }
}
