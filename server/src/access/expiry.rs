//! Cancellable, keyed timers for access-record expiry.
//!
//! Each scheduled job is a detached tokio task that sleeps for the TTL, then
//! runs its deletion future. Jobs are tracked by access key so they can be
//! cancelled individually or drained at shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

#[derive(Clone, Default)]
pub struct ExpiryScheduler {
    pending: Arc<DashMap<String, AbortHandle>>,
}

impl ExpiryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` after `after`. Rescheduling an existing key replaces its timer.
    pub fn schedule<F>(&self, key: String, after: Duration, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (armed_tx, armed_rx) = oneshot::channel::<()>();
        let pending = self.pending.clone();
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            // Wait until the handle is registered so removal below cannot race it
            if armed_rx.await.is_err() {
                return;
            }
            tokio::time::sleep(after).await;
            pending.remove(&task_key);
            job.await;
        });

        if let Some(previous) = self.pending.insert(key, handle.abort_handle()) {
            previous.abort();
        }
        let _ = armed_tx.send(());
    }

    /// Abort the timer for `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &str) -> bool {
        match self.pending.remove(key) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    /// Abort every pending timer and return the keys that had not fired yet.
    pub fn drain(&self) -> Vec<String> {
        let keys: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        keys.into_iter()
            .filter(|key| self.cancel(key))
            .collect()
    }
}
