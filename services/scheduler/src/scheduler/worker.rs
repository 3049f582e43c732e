//! Scheduling workers.
//!
//! A worker is a blocking pull from the queue in a simple loop; parallelism
//! comes from running several such loops. The queue's in-flight tracking
//! guarantees at most one worker holds a given key at a time.

use std::sync::Arc;

use tracing::{debug, warn};

use super::error::Disposition;
use super::Scheduler;

/// Drain the queue until shutdown.
pub(super) async fn run(scheduler: Arc<Scheduler>, worker_id: usize) {
    debug!(worker_id, "worker started");

    while let Some(key) = scheduler.queue.get().await {
        match scheduler.schedule_key(&key).await {
            Ok(()) => scheduler.queue.forget(&key),
            Err(err) => match err.disposition() {
                Disposition::Forget => {
                    debug!(pod = %key, reason = %err, "dropping key");
                    scheduler.queue.forget(&key);
                }
                Disposition::Requeue => {
                    if err.is_deferral() {
                        debug!(pod = %key, reason = %err, "scheduling deferred");
                    } else {
                        warn!(pod = %key, error = %err, "scheduling attempt failed");
                    }
                    Arc::clone(&scheduler.queue).add_rate_limited(&key);
                }
            },
        }
        scheduler.queue.done(&key);
    }

    debug!(worker_id, "worker stopped");
}
