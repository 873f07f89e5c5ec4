use std::sync::Arc;

use crate::access::{AccessGate, AccessLedger, Clock, SystemClock};
use crate::auth::{IdentityProvider, IdentityVerifier};
use crate::config::AccessConfig;
use crate::db::DocumentStore;
use crate::records::{HistoryService, PatientDirectory, PrescriptionBook, RecordService};
use crate::storage::keys::KeyProvider;
use crate::storage::StoreClient;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Keyed JSON documents (users, history pointers, prescriptions, access records)
    pub documents: Arc<dyn DocumentStore>,
    /// Bearer credential verification and role checks
    pub verifier: Arc<IdentityVerifier>,
    /// One-time access protocol for hospital reads
    pub gate: Arc<AccessGate>,
    /// Access records and their expiry timers
    pub ledger: Arc<AccessLedger>,
    pub patients: PatientDirectory,
    pub history: HistoryService,
    pub prescriptions: PrescriptionBook,
    /// Per-IP rate limit on one-time routes: (burst, seconds per token)
    pub one_time_rate: (u32, u64),
}

impl AppState {
    /// Wire every service from its collaborators, reading the wall clock.
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        provider: Arc<dyn IdentityProvider>,
        keys: Arc<dyn KeyProvider>,
        store: StoreClient,
        access: &AccessConfig,
    ) -> Self {
        Self::with_clock(documents, provider, keys, store, access, Arc::new(SystemClock))
    }

    pub fn with_clock(
        documents: Arc<dyn DocumentStore>,
        provider: Arc<dyn IdentityProvider>,
        keys: Arc<dyn KeyProvider>,
        store: StoreClient,
        access: &AccessConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let verifier = Arc::new(IdentityVerifier::new(provider));
        let ledger = Arc::new(AccessLedger::new(documents.clone(), clock.clone(), access.ttl()));
        let gate = Arc::new(AccessGate::new(
            verifier.clone(),
            ledger.clone(),
            clock,
            access.key_policy,
        ));

        let patients = PatientDirectory::new(documents.clone());
        let history = HistoryService::new(RecordService::new(store), documents.clone(), keys);
        let prescriptions = PrescriptionBook::new(documents.clone(), patients.clone());

        Self {
            documents,
            verifier,
            gate,
            ledger,
            patients,
            history,
            prescriptions,
            one_time_rate: (access.burst, access.replenish_secs),
        }
    }
}
