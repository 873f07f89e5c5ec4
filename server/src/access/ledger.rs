//! Access ledger: records "(resource, subject) accessed at T" in the
//! `transactions` collection and expires each record after the TTL.
//!
//! Every store failure is surfaced as `StoreUnavailable` so the gate can fail
//! closed. Expiry deletions are best-effort: a failed deletion is logged and
//! the record lingers, which can only cause a repeat denial.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::access::expiry::ExpiryScheduler;
use crate::access::key::{AccessKey, Clock};
use crate::db::models::{AccessRecord, TRANSACTIONS};
use crate::db::{self, DocumentError, DocumentStore};
use crate::error::{Error, Result};

pub struct AccessLedger {
    documents: Arc<dyn DocumentStore>,
    expiry: ExpiryScheduler,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl AccessLedger {
    pub fn new(documents: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            documents,
            expiry: ExpiryScheduler::new(),
            clock,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn scheduler(&self) -> &ExpiryScheduler {
        &self.expiry
    }

    /// Whether `key` has a live access record. A record older than the TTL
    /// counts as expired even if its deletion never ran.
    pub async fn has_been_used(&self, key: &AccessKey) -> Result<bool> {
        let record: Option<AccessRecord> =
            db::get_as(self.documents.as_ref(), TRANSACTIONS, key.as_str())
                .await
                .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        match record {
            Some(record) if self.is_expired(&record) => {
                tracing::debug!("Access record {} is past its TTL, treating as unused", key);
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    /// Claim `key` and schedule the record's deletion after the TTL.
    ///
    /// The claim is an insert-if-absent, so of two concurrent callers only
    /// one gets `Ok`; the other gets `AlreadyUsed`. A record past its TTL is
    /// taken over with a compare-and-swap on its `access_time`.
    pub async fn mark_used(&self, key: &AccessKey, subject_id: &str, resource_id: &str) -> Result<()> {
        let record = AccessRecord {
            id: key.to_string(),
            subject_id: subject_id.to_string(),
            resource_id: resource_id.to_string(),
            access_time: self.clock.now(),
        };
        let value = serde_json::to_value(&record).map_err(|e| Error::Internal(e.to_string()))?;
        let stamp = value["access_time"].clone();

        match self.documents.create(TRANSACTIONS, key.as_str(), value.clone()).await {
            Ok(()) => {}
            Err(DocumentError::AlreadyExists { .. }) => self.take_over_stale(key, value).await?,
            Err(e) => return Err(Error::StoreUnavailable(e.to_string())),
        }

        let documents = self.documents.clone();
        let doc_id = key.to_string();
        self.expiry.schedule(key.to_string(), self.ttl, async move {
            expire_record(documents.as_ref(), &doc_id, &stamp).await;
        });

        Ok(())
    }

    async fn take_over_stale(&self, key: &AccessKey, value: Value) -> Result<()> {
        let existing = self
            .documents
            .get(TRANSACTIONS, key.as_str())
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        let Some(existing) = existing else {
            // Expired and deleted since the insert attempt
            return match self.documents.create(TRANSACTIONS, key.as_str(), value).await {
                Ok(()) => Ok(()),
                Err(DocumentError::AlreadyExists { .. }) => Err(Error::AlreadyUsed),
                Err(e) => Err(Error::StoreUnavailable(e.to_string())),
            };
        };

        let record: AccessRecord = serde_json::from_value(existing.clone())
            .map_err(|e| Error::StoreUnavailable(format!("malformed access record {}: {}", key, e)))?;
        if !self.is_expired(&record) {
            return Err(Error::AlreadyUsed);
        }

        let swapped = self
            .documents
            .replace_if(TRANSACTIONS, key.as_str(), "access_time", &existing["access_time"], value)
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        if !swapped {
            return Err(Error::AlreadyUsed);
        }
        tracing::debug!("Replaced stale access record {}", key);
        Ok(())
    }

    fn is_expired(&self, record: &AccessRecord) -> bool {
        // Negative age (clock skew) counts as fresh
        let age = (self.clock.now() - record.access_time)
            .to_std()
            .unwrap_or(Duration::ZERO);
        age >= self.ttl
    }

    /// Stop all expiry timers. With `flush`, pending records are deleted now;
    /// otherwise they are only logged and left for the TTL check to ignore.
    pub async fn shutdown(&self, flush: bool) {
        let pending = self.expiry.drain();
        if pending.is_empty() {
            return;
        }

        if !flush {
            for key in &pending {
                tracing::info!("Pending access-record expiry dropped at shutdown: {}", key);
            }
            return;
        }

        let mut flushed = 0;
        for key in &pending {
            match self.documents.delete(TRANSACTIONS, key).await {
                Ok(()) => flushed += 1,
                Err(e) => tracing::warn!("Failed to flush access record {}: {}", key, e),
            }
        }
        tracing::info!("Flushed {} of {} pending access records", flushed, pending.len());
    }
}

/// Delete the record for `doc_id` only if it is still the one stamped
/// `stamp`. A newer record written under the same key is left alone.
async fn expire_record(documents: &dyn DocumentStore, doc_id: &str, stamp: &Value) {
    match documents.delete_if(TRANSACTIONS, doc_id, "access_time", stamp).await {
        Ok(true) => tracing::debug!("Access record {} expired", doc_id),
        Ok(false) => tracing::debug!("Access record {} was replaced, keeping it", doc_id),
        Err(e) => tracing::warn!("Failed to clean up access record {}: {}", doc_id, e),
    }
}
