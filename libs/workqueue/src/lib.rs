//! Work queue primitives for scheduling loops.
//!
//! This library provides the queue that sits between event ingestion and the
//! scheduling workers. Key properties:
//!
//! - **Deduplication**: adding a key that is already queued is a no-op.
//! - **In-flight tracking**: a key handed out by [`Workqueue::get`] is
//!   considered processing until [`Workqueue::done`] is called; adds that
//!   arrive while a key is processing are coalesced into exactly one
//!   follow-up wake.
//! - **Per-key backoff**: keys re-added after a failed attempt are delayed by
//!   an exponentially increasing backoff, reset by [`Workqueue::forget`].
//!
//! # Invariants
//!
//! - A key is held by at most one worker at a time.
//! - A key appears in the pending queue at most once.
//! - After `shut_down`, pending keys drain and `get` then returns `None`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, trace};

/// Base delay for the first retry of a key.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);

/// Upper bound on the per-key retry delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Per-key exponential backoff tracker.
///
/// Each call to [`RateLimiter::next_delay`] for a key doubles the delay,
/// starting at the base and saturating at the maximum. [`RateLimiter::forget`]
/// clears the key's history.
#[derive(Debug)]
pub struct RateLimiter {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<String, u32>>,
}

impl RateLimiter {
    /// Create a rate limiter with the given base and maximum delays.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure for `key` and return the delay before its next retry.
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut failures = self.failures.lock().expect("rate limiter lock poisoned");
        let attempts = failures.entry(key.to_string()).or_insert(0);
        *attempts += 1;

        let shift = (*attempts - 1).min(31);
        let delay = self.base.saturating_mul(1u32 << shift);
        delay.min(self.max)
    }

    /// Number of consecutive failures recorded for `key`.
    pub fn retries(&self, key: &str) -> u32 {
        let failures = self.failures.lock().expect("rate limiter lock poisoned");
        failures.get(key).copied().unwrap_or(0)
    }

    /// Clear failure history for `key`.
    pub fn forget(&self, key: &str) {
        let mut failures = self.failures.lock().expect("rate limiter lock poisoned");
        failures.remove(key);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

#[derive(Debug, Default)]
struct Inner {
    /// Keys ready to be handed to a worker, in FIFO order.
    queue: VecDeque<String>,
    /// Mirror of `queue` for O(1) dedup.
    queued: HashSet<String>,
    /// Keys currently held by a worker.
    processing: HashSet<String>,
    /// Keys re-added while processing; re-queued once on `done`.
    dirty: HashSet<String>,
    shutting_down: bool,
}

/// Deduplicating FIFO of string keys with in-flight tracking and shutdown.
///
/// The queue is the sole synchronization point between event handlers and
/// scheduling workers: handlers call [`Workqueue::add`], workers loop on
/// [`Workqueue::get`] / [`Workqueue::done`].
#[derive(Debug)]
pub struct Workqueue {
    inner: Mutex<Inner>,
    notify: Notify,
    limiter: RateLimiter,
}

impl Workqueue {
    pub fn new() -> Self {
        Self::with_rate_limiter(RateLimiter::default())
    }

    /// Create a queue with a custom retry rate limiter.
    pub fn with_rate_limiter(limiter: RateLimiter) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            limiter,
        }
    }

    /// Enqueue `key` now.
    ///
    /// No-op if the key is already queued or the queue is shut down. If the
    /// key is currently processing, it is marked dirty and becomes eligible
    /// again exactly once after [`Workqueue::done`].
    pub fn add(&self, key: &str) {
        let mut inner = self.inner.lock().expect("workqueue lock poisoned");
        if inner.shutting_down {
            trace!(key, "dropping add, queue shutting down");
            return;
        }
        if inner.processing.contains(key) {
            inner.dirty.insert(key.to_string());
            return;
        }
        if !inner.queued.insert(key.to_string()) {
            return;
        }
        inner.queue.push_back(key.to_string());
        drop(inner);
        self.notify.notify_one();
    }

    /// Enqueue `key` after its per-key backoff delay.
    ///
    /// Takes an owned handle because the delayed add outlives the caller.
    pub fn add_rate_limited(self: Arc<Self>, key: &str) {
        let delay = self.limiter.next_delay(key);
        debug!(
            key,
            delay_ms = delay.as_millis() as u64,
            retries = self.limiter.retries(key),
            "requeueing with backoff"
        );
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            self.add(&key);
        });
    }

    /// Pull the next key, waiting until one is ready.
    ///
    /// Returns `None` once the queue has been shut down and drained. The
    /// returned key is in-flight until [`Workqueue::done`] is called for it.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking state so a wake landing
            // between the check and the await is not lost.
            notified.as_mut().enable();
            {
                let mut inner = self.inner.lock().expect("workqueue lock poisoned");
                if let Some(key) = inner.queue.pop_front() {
                    inner.queued.remove(&key);
                    inner.processing.insert(key.clone());
                    return Some(key);
                }
                if inner.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark processing of `key` complete.
    ///
    /// If the key was re-added while processing, it is queued again now.
    pub fn done(&self, key: &str) {
        let mut inner = self.inner.lock().expect("workqueue lock poisoned");
        inner.processing.remove(key);
        if inner.dirty.remove(key) && !inner.shutting_down && inner.queued.insert(key.to_string()) {
            inner.queue.push_back(key.to_string());
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Reset the retry backoff for `key`.
    pub fn forget(&self, key: &str) {
        self.limiter.forget(key);
    }

    /// Number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("workqueue lock poisoned").queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Disable further adds and wake all blocked [`Workqueue::get`] calls.
    ///
    /// Already-queued keys are still handed out; once the queue is empty,
    /// `get` returns `None`.
    pub fn shut_down(&self) {
        let mut inner = self.inner.lock().expect("workqueue lock poisoned");
        inner.shutting_down = true;
        inner.dirty.clear();
        drop(inner);
        self.notify.notify_waiters();
    }
}

impl Default for Workqueue {
    fn default() -> Self {
        Self::new()
    }
}
