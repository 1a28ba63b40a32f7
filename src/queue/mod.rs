//! Rate-limited, de-duplicating work queue
//!
//! Keys flow in from watch events and out to the reconcile workers. The
//! queue guarantees per-key exclusion: a key handed to a worker is not
//! handed out again until the worker calls [`WorkQueue::done`]; re-adds in
//! the meantime are parked and replayed afterwards, so reconciles for one
//! key never run concurrently but no event is lost either.
//!
//! Failed keys are re-queued with exponential backoff, doubling from the
//! configured start interval up to the cap, reset on the first success.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;


pub struct WorkQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    base_delay: Duration,
    max_delay: Duration,
}

struct Inner {
    queue: VecDeque<String>,
    queued: HashSet<String>,
    processing: HashSet<String>,
    parked: HashSet<String>,
    failures: HashMap<String, u32>,
    shut_down: bool,
}

impl WorkQueue {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Arc<Self> {
        Arc::new(WorkQueue {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                queued: HashSet::new(),
                processing: HashSet::new(),
                parked: HashSet::new(),
                failures: HashMap::new(),
                shut_down: false,
            }),
            notify: Notify::new(),
            base_delay,
            max_delay,
        })
    }

    /// Queue `key` for processing. Idempotent with respect to keys already
    /// waiting; keys currently being processed are parked and re-queued when
    /// their processor finishes.
    pub fn add(&self, key: impl Into<String>) {
        let key = key.into();
        {
            let mut inner = self.inner.lock().expect("queue mutex poisoned");
            if inner.shut_down {
                return;
            }
            if inner.processing.contains(&key) {
                inner.parked.insert(key);
                return;
            }
            if !inner.queued.insert(key.clone()) {
                return;
            }
            inner.queue.push_back(key);
        }
        self.notify.notify_one();
    }

    /// Queue `key` after the backoff delay derived from its failure count.
    pub fn add_rate_limited(self: &Arc<Self>, key: String) {
        let delay = self.backoff_for(&key);
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// The delay the next rate-limited add of `key` would incur.
    pub fn backoff_for(&self, key: &str) -> Duration {
        let failures = {
            let inner = self.inner.lock().expect("queue mutex poisoned");
            inner.failures.get(key).copied().unwrap_or(0)
        };
        // Exponent is capped so the shift cannot overflow; the delay
        // saturates at max_delay long before that.
        let exp = failures.saturating_sub(1).min(16);
        let delay = self.base_delay * 2u32.pow(exp);
        delay.min(self.max_delay)
    }

    /// Wait for the next ready key and mark it as being processed. Returns
    /// `None` once the queue has been shut down and drained.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            let popped = {
                let mut inner = self.inner.lock().expect("queue mutex poisoned");
                match inner.queue.pop_front() {
                    Some(key) => {
                        inner.queued.remove(&key);
                        inner.processing.insert(key.clone());
                        let more = !inner.queue.is_empty();
                        Some((key, more))
                    }
                    None if inner.shut_down => return None,
                    None => None,
                }
            };
            if let Some((key, more)) = popped {
                // A single stored permit can hide later adds from the other
                // waiters; pass the wakeup along while work remains.
                if more {
                    self.notify.notify_one();
                }
                return Some(key);
            }
            notified.await;
        }
    }

    /// Report the outcome of processing `key`. On success the failure
    /// counter is cleared; on failure it is bumped and the key re-queued
    /// with backoff. A key that was re-added mid-processing goes straight
    /// back on the queue.
    pub fn done(self: &Arc<Self>, key: &str, success: bool) {
        let parked = {
            let mut inner = self.inner.lock().expect("queue mutex poisoned");
            inner.processing.remove(key);
            if success {
                inner.failures.remove(key);
            } else {
                *inner.failures.entry(key.to_string()).or_insert(0) += 1;
            }
            inner.parked.remove(key)
        };
        if parked {
            self.add(key.to_string());
        } else if !success {
            debug!(key, backoff = ?self.backoff_for(key), "re-queueing failed key");
            self.add_rate_limited(key.to_string());
        }
    }

    /// One-shot shutdown: wakes every waiting worker. Queued keys are still
    /// drained; new adds are ignored.
    pub fn shut_down(&self) {
        {
            let mut inner = self.inner.lock().expect("queue mutex poisoned");
            inner.shut_down = true;
        }
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue mutex poisoned").queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
