//! One-time access gate.
//!
//! START → IDENTITY_CHECKED → ROLE_CHECKED → DEDUP_CHECKED → GRANTED, or
//! DENIED at the first failing step. The ledger is only touched once the
//! caller is authenticated and holds the required role.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::access::key::{derive_access_key, AccessKey, AccessKeyPolicy, Clock};
use crate::access::ledger::AccessLedger;
use crate::auth::identity::{IdentityVerifier, Role, VerifiedIdentity};
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Start,
    IdentityChecked,
    RoleChecked,
    DedupChecked,
    Granted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Unauthorized,
    Forbidden,
    AlreadyUsed,
    Internal,
}

/// Terminal failure. `at` is the last state reached before the failing step.
#[derive(Debug)]
pub struct Denial {
    pub at: GateState,
    pub reason: DenyReason,
    pub error: Error,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "denied after {:?} ({:?}): {}", self.at, self.reason, self.error)
    }
}

impl From<Denial> for Error {
    fn from(denial: Denial) -> Self {
        match denial.reason {
            DenyReason::Internal => match denial.error {
                Error::Internal(msg) => Error::Internal(msg),
                other => Error::Internal(other.to_string()),
            },
            _ => denial.error,
        }
    }
}

/// Successful admission. The key and subject are for audit logging only and
/// must not be written to a response.
#[derive(Debug, Clone)]
pub struct Grant {
    pub access_key: AccessKey,
    pub identity: VerifiedIdentity,
    pub resource_id: String,
    pub access_time: DateTime<Utc>,
}

impl Grant {
    pub fn subject_id(&self) -> &str {
        &self.identity.subject_id
    }
}

pub struct AccessGate {
    verifier: Arc<IdentityVerifier>,
    ledger: Arc<AccessLedger>,
    clock: Arc<dyn Clock>,
    policy: AccessKeyPolicy,
}

impl AccessGate {
    pub fn new(
        verifier: Arc<IdentityVerifier>,
        ledger: Arc<AccessLedger>,
        clock: Arc<dyn Clock>,
        policy: AccessKeyPolicy,
    ) -> Self {
        Self {
            verifier,
            ledger,
            clock,
            policy,
        }
    }

    pub fn ledger(&self) -> &Arc<AccessLedger> {
        &self.ledger
    }

    pub fn policy(&self) -> AccessKeyPolicy {
        self.policy
    }

    /// Run the full protocol for one request.
    pub async fn admit(
        &self,
        credential: &str,
        route_path: &str,
        required: Role,
        resource_id: &str,
    ) -> Result<Grant, Denial> {
        let deny = |at: GateState, reason: DenyReason, error: Error| {
            tracing::debug!(
                "Access to {} denied after {:?}: {:?}",
                route_path,
                at,
                reason
            );
            Denial { at, reason, error }
        };

        let identity = self
            .verifier
            .verify(credential)
            .await
            .map_err(|e| deny(GateState::Start, DenyReason::Unauthorized, e))?;

        self.verifier
            .authorize(&identity, required)
            .map_err(|e| deny(GateState::IdentityChecked, DenyReason::Forbidden, e))?;

        let now = self.clock.now();
        let key = derive_access_key(
            self.policy,
            route_path,
            &identity.subject_id,
            resource_id,
            now,
        );

        match self.ledger.has_been_used(&key).await {
            Ok(false) => {}
            Ok(true) => {
                tracing::warn!(
                    "Repeated access by {} to {} refused",
                    identity.subject_id,
                    resource_id
                );
                return Err(deny(
                    GateState::RoleChecked,
                    DenyReason::AlreadyUsed,
                    Error::AlreadyUsed,
                ));
            }
            Err(e) => {
                tracing::error!("Access ledger lookup failed, denying: {}", e);
                return Err(deny(GateState::RoleChecked, DenyReason::Internal, e));
            }
        }

        // The access only counts as consumed once the claim is durable. A
        // concurrent request for the same key loses the claim here.
        match self.ledger.mark_used(&key, &identity.subject_id, resource_id).await {
            Ok(()) => {}
            Err(Error::AlreadyUsed) => {
                tracing::warn!(
                    "Concurrent access by {} to {} refused",
                    identity.subject_id,
                    resource_id
                );
                return Err(deny(
                    GateState::DedupChecked,
                    DenyReason::AlreadyUsed,
                    Error::AlreadyUsed,
                ));
            }
            Err(e) => {
                tracing::error!("Access ledger write failed, denying: {}", e);
                return Err(deny(GateState::DedupChecked, DenyReason::Internal, e));
            }
        }

        tracing::info!(
            access_key = %key,
            subject = %identity.subject_id,
            route = route_path,
            resource = resource_id,
            "One-time access granted"
        );

        Ok(Grant {
            access_key: key,
            identity,
            resource_id: resource_id.to_string(),
            access_time: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::key::ManualClock;
    use crate::access::ledger::tests::DownStore;
    use crate::auth::identity::tests::StaticProvider;
    use crate::db::models::TRANSACTIONS;
    use crate::db::{DocumentStore, SqliteDocumentStore};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    const ROUTE: &str = "/api/hospital/patient/NFC123";

    struct Fixture {
        gate: AccessGate,
        provider: Arc<StaticProvider>,
        documents: Arc<dyn DocumentStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture_with(documents: Arc<dyn DocumentStore>, policy: AccessKeyPolicy) -> Fixture {
        let provider = Arc::new(StaticProvider::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let verifier = Arc::new(IdentityVerifier::new(provider.clone()));
        let ledger = Arc::new(AccessLedger::new(
            documents.clone(),
            clock.clone(),
            Duration::from_secs(300),
        ));
        Fixture {
            gate: AccessGate::new(verifier, ledger, clock.clone(), policy),
            provider,
            documents,
            clock,
        }
    }

    fn fixture(policy: AccessKeyPolicy) -> Fixture {
        let documents: Arc<dyn DocumentStore> =
            Arc::new(SqliteDocumentStore::new(crate::db::init_memory_db().unwrap()));
        fixture_with(documents, policy)
    }

    async fn ledger_size(f: &Fixture) -> usize {
        f.documents.query(TRANSACTIONS, &[]).await.unwrap().len()
    }

    #[tokio::test]
    async fn test_grant_then_already_used() {
        let f = fixture(AccessKeyPolicy::PerResource);

        let grant = f
            .gate
            .admit("Bearer hospital-1:hospital", ROUTE, Role::Hospital, "NFC123")
            .await
            .unwrap();
        assert_eq!(grant.subject_id(), "hospital-1");
        assert_eq!(grant.access_key.as_str(), format!("{}_hospital-1_NFC123", ROUTE));

        f.clock.advance(chrono::Duration::milliseconds(500));
        let denial = f
            .gate
            .admit("Bearer hospital-1:hospital", ROUTE, Role::Hospital, "NFC123")
            .await
            .unwrap_err();
        assert_eq!(denial.reason, DenyReason::AlreadyUsed);
        assert_eq!(denial.at, GateState::RoleChecked);
        assert!(matches!(Error::from(denial), Error::AlreadyUsed));
    }

    #[tokio::test]
    async fn test_wrong_scheme_denied_before_any_call() {
        let down = Arc::new(DownStore::default());
        let f = fixture_with(down.clone(), AccessKeyPolicy::PerResource);

        let denial = f
            .gate
            .admit("Token abc", ROUTE, Role::Hospital, "NFC123")
            .await
            .unwrap_err();
        assert_eq!(denial.reason, DenyReason::Unauthorized);
        assert_eq!(denial.at, GateState::Start);
        assert_eq!(f.provider.calls.load(Ordering::SeqCst), 0);
        assert_eq!(down.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_token_never_writes_ledger() {
        let f = fixture(AccessKeyPolicy::PerResource);

        for credential in ["Bearer forged", "Bearer x:", "", "Bearer"] {
            let denial = f
                .gate
                .admit(credential, ROUTE, Role::Hospital, "NFC123")
                .await
                .unwrap_err();
            assert_eq!(denial.reason, DenyReason::Unauthorized);
        }
        assert_eq!(ledger_size(&f).await, 0);
    }

    #[tokio::test]
    async fn test_wrong_role_forbidden_without_ledger_write() {
        let f = fixture(AccessKeyPolicy::PerResource);

        let denial = f
            .gate
            .admit("Bearer doctor-1:doctor", ROUTE, Role::Hospital, "NFC123")
            .await
            .unwrap_err();
        assert_eq!(denial.reason, DenyReason::Forbidden);
        assert_eq!(denial.at, GateState::IdentityChecked);
        assert_eq!(ledger_size(&f).await, 0);
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let f = fixture_with(Arc::new(DownStore::default()), AccessKeyPolicy::PerResource);

        let denial = f
            .gate
            .admit("Bearer hospital-1:hospital", ROUTE, Role::Hospital, "NFC123")
            .await
            .unwrap_err();
        assert_eq!(denial.reason, DenyReason::Internal);
        assert!(matches!(Error::from(denial), Error::Internal(_)));
    }

    #[tokio::test]
    async fn test_per_instant_same_tick_collides() {
        let f = fixture(AccessKeyPolicy::PerInstant);

        f.gate
            .admit("Bearer h1:hospital", ROUTE, Role::Hospital, "NFC123")
            .await
            .unwrap();
        let denial = f
            .gate
            .admit("Bearer h1:hospital", ROUTE, Role::Hospital, "NFC123")
            .await
            .unwrap_err();
        assert_eq!(denial.reason, DenyReason::AlreadyUsed);
    }

    #[tokio::test]
    async fn test_per_instant_next_tick_does_not_collide() {
        let f = fixture(AccessKeyPolicy::PerInstant);

        let first = f
            .gate
            .admit("Bearer h1:hospital", ROUTE, Role::Hospital, "NFC123")
            .await
            .unwrap();
        f.clock.advance(chrono::Duration::nanoseconds(1));
        let second = f
            .gate
            .admit("Bearer h1:hospital", ROUTE, Role::Hospital, "NFC123")
            .await
            .unwrap();
        assert_ne!(first.access_key, second.access_key);
        assert_eq!(ledger_size(&f).await, 2);
    }

    #[tokio::test]
    async fn test_other_subject_or_resource_not_deduplicated() {
        let f = fixture(AccessKeyPolicy::PerResource);

        f.gate
            .admit("Bearer h1:hospital", ROUTE, Role::Hospital, "NFC123")
            .await
            .unwrap();
        f.gate
            .admit("Bearer h2:hospital", ROUTE, Role::Hospital, "NFC123")
            .await
            .unwrap();
        f.gate
            .admit("Bearer h1:hospital", ROUTE, Role::Hospital, "NFC999")
            .await
            .unwrap();
        assert_eq!(ledger_size(&f).await, 3);
    }

    #[tokio::test]
    async fn test_access_allowed_again_after_ttl() {
        let f = fixture(AccessKeyPolicy::PerResource);

        let first = f
            .gate
            .admit("Bearer h1:hospital", ROUTE, Role::Hospital, "NFC123")
            .await
            .unwrap();
        // Simulate a lost deletion timer
        f.gate.ledger().scheduler().cancel(first.access_key.as_str());

        f.clock.advance(chrono::Duration::minutes(5));
        assert!(f
            .gate
            .admit("Bearer h1:hospital", ROUTE, Role::Hospital, "NFC123")
            .await
            .is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admits_grant_once() {
        let f = fixture(AccessKeyPolicy::PerResource);
        let gate = Arc::new(f.gate);

        for i in 0..50 {
            let resource = format!("NFC{}", i);
            let attempts: Vec<_> = (0..2)
                .map(|_| {
                    let gate = gate.clone();
                    let resource = resource.clone();
                    tokio::spawn(async move {
                        gate.admit("Bearer h1:hospital", ROUTE, Role::Hospital, &resource)
                            .await
                    })
                })
                .collect();

            let mut granted = 0;
            for attempt in attempts {
                match attempt.await.unwrap() {
                    Ok(_) => granted += 1,
                    Err(denial) => assert_eq!(denial.reason, DenyReason::AlreadyUsed),
                }
            }
            assert_eq!(granted, 1, "{} granted {} times", resource, granted);
        }

        let size = f.documents.query(TRANSACTIONS, &[]).await.unwrap().len();
        assert_eq!(size, 50);
    }
}
