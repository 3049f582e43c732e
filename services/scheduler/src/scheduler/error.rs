//! Scheduling error taxonomy and requeue dispositions.

use muster_cluster::ClusterError;
use thiserror::Error;

/// Reasons a single scheduling attempt can fail.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The pod disappeared between enqueue and processing.
    #[error("pod {0} is no longer in the view")]
    PodGone(String),

    /// Not enough unbound members to dispatch the gang.
    #[error("gang {gang} not ready: need {need} unbound members, have {have}")]
    GangNotReady {
        gang: String,
        need: usize,
        have: usize,
    },

    /// No node has capacity for this member.
    #[error("no feasible node for pod {0}")]
    NoFeasibleNode(String),

    /// Every node is cordoned or unready.
    #[error("no schedulable nodes")]
    NoSchedulableNodes,

    /// A cluster API call failed.
    #[error(transparent)]
    Api(#[from] ClusterError),
}

/// What the worker does with a key after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Drop the key without retrying.
    Forget,
    /// Retry after the per-key backoff.
    Requeue,
}

impl ScheduleError {
    pub fn disposition(&self) -> Disposition {
        match self {
            ScheduleError::PodGone(_) => Disposition::Forget,
            ScheduleError::GangNotReady { .. }
            | ScheduleError::NoFeasibleNode(_)
            | ScheduleError::NoSchedulableNodes
            | ScheduleError::Api(_) => Disposition::Requeue,
        }
    }

    /// Deferrals are routine gang-formation waits, not operator-visible
    /// failures.
    pub fn is_deferral(&self) -> bool {
        matches!(self, ScheduleError::GangNotReady { .. })
    }
}
