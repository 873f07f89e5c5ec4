//! Retrying client over a [`BlobBackend`].
//!
//! Transient failures are retried up to `max_tries` attempts with linear
//! backoff (`attempt * base_delay`). `NotFound` is never retried. Batch uploads
//! fan out one task per chunk and are all-or-nothing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::storage::backend::{BackendError, BlobBackend, Cid};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_tries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Clone)]
pub struct StoreClient {
    backend: Arc<dyn BlobBackend>,
    policy: RetryPolicy,
}

impl StoreClient {
    pub fn new(backend: Arc<dyn BlobBackend>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            policy: RetryPolicy {
                max_tries: policy.max_tries.max(1),
                ..policy
            },
        }
    }

    /// Delay after failed attempt `attempt`, saturating instead of overflowing.
    fn backoff(&self, attempt: u32) -> Duration {
        self.policy.base_delay.saturating_mul(attempt)
    }

    pub async fn upload(&self, data: &[u8]) -> Result<Cid> {
        let mut attempt = 1;
        loop {
            match self.backend.add(data).await {
                Ok(cid) => return Ok(cid),
                Err(e) if attempt >= self.policy.max_tries => {
                    tracing::warn!("Upload failed after {} attempts: {}", attempt, e);
                    return Err(Error::StoreUnavailable(e.to_string()));
                }
                Err(e) => {
                    tracing::debug!("Upload attempt {} failed: {}", attempt, e);
                    tokio::time::sleep(self.backoff(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    pub async fn download(&self, cid: &Cid) -> Result<Vec<u8>> {
        let mut attempt = 1;
        loop {
            match self.backend.cat(cid).await {
                Ok(data) => return Ok(data),
                Err(BackendError::NotFound(_)) => {
                    return Err(Error::NotFound(format!("blob {}", cid)));
                }
                Err(e) if attempt >= self.policy.max_tries => {
                    tracing::warn!(
                        "Download of {} failed after {} attempts: {}",
                        cid,
                        attempt,
                        e
                    );
                    return Err(Error::StoreUnavailable(e.to_string()));
                }
                Err(e) => {
                    tracing::debug!("Download attempt {} for {} failed: {}", attempt, cid, e);
                    tokio::time::sleep(self.backoff(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Upload every chunk concurrently. Returns CIDs in input order, or
    /// `PartialBatchFailure` (and no CIDs at all) if any chunk failed.
    pub async fn upload_batch(&self, chunks: Vec<Vec<u8>>) -> Result<Vec<Cid>> {
        let total = chunks.len();
        let collected: Arc<Mutex<Vec<(usize, Result<Cid>)>>> =
            Arc::new(Mutex::new(Vec::with_capacity(total)));

        let handles: Vec<_> = chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| {
                let client = self.clone();
                let collected = collected.clone();
                tokio::spawn(async move {
                    let result = client.upload(&chunk).await;
                    if let Ok(mut results) = collected.lock() {
                        results.push((index, result));
                    }
                })
            })
            .collect();

        for joined in futures_util::future::join_all(handles).await {
            if let Err(e) = joined {
                tracing::error!("Batch upload task join error: {}", e);
            }
        }

        let mut results = std::mem::take(
            &mut *collected
                .lock()
                .map_err(|e| Error::Internal(format!("batch collector poisoned: {}", e)))?,
        );

        let failed = total - results.iter().filter(|(_, r)| r.is_ok()).count();
        if failed > 0 {
            tracing::warn!("Batch upload: {} of {} chunks failed", failed, total);
            return Err(Error::PartialBatchFailure { failed, total });
        }

        results.sort_by_key(|(index, _)| *index);
        results
            .into_iter()
            .map(|(_, result)| result)
            .collect::<Result<Vec<Cid>>>()
    }
}
