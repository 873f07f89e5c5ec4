//! Bearer-credential verification and role authorization.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Error, Result};

pub const MALFORMED_CREDENTIAL: &str = "malformed credential";
pub const INVALID_TOKEN: &str = "invalid or expired token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Doctor,
    Pharmacist,
    Hospital,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Doctor => "doctor",
            Role::Pharmacist => "pharmacist",
            Role::Hospital => "hospital",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "patient" => Ok(Role::Patient),
            "doctor" => Ok(Role::Doctor),
            "pharmacist" => Ok(Role::Pharmacist),
            "hospital" => Ok(Role::Hospital),
            _ => Err(()),
        }
    }
}

/// Identity established for the duration of one request. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub subject_id: String,
    pub role: Role,
    pub expiry: DateTime<Utc>,
}

/// What the identity provider reports for a valid token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub subject_id: String,
    /// Raw custom role claim, if the token carries one
    pub role_claim: Option<String>,
    pub expiry: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAccount {
    pub subject_id: String,
    pub role: Option<Role>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("token rejected: {0}")]
    Rejected(String),

    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// External identity provider. Token issuance lives outside this service.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify_token(&self, token: &str) -> Result<TokenClaims, ProviderError>;

    async fn set_role_claim(&self, subject_id: &str, role: Role) -> Result<(), ProviderError>;

    async fn get_by_subject_id(
        &self,
        subject_id: &str,
    ) -> Result<Option<ProviderAccount>, ProviderError>;
}

/// Extract the token from `"Bearer <token>"`. Exactly one space, non-empty token.
pub fn parse_bearer(credential: &str) -> Option<&str> {
    let token = credential.strip_prefix("Bearer ")?;
    if token.is_empty() || token.contains(char::is_whitespace) {
        return None;
    }
    Some(token)
}

pub struct IdentityVerifier {
    provider: Arc<dyn IdentityProvider>,
}

impl IdentityVerifier {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.provider
    }

    /// Validate a raw `Authorization` header value. Read-only.
    pub async fn verify(&self, credential: &str) -> Result<VerifiedIdentity> {
        let token = parse_bearer(credential).ok_or(Error::Unauthorized(MALFORMED_CREDENTIAL))?;

        let claims = self.provider.verify_token(token).await.map_err(|e| {
            tracing::debug!("Token verification failed: {}", e);
            Error::Unauthorized(INVALID_TOKEN)
        })?;

        let role = claims
            .role_claim
            .as_deref()
            .and_then(|r| r.parse::<Role>().ok())
            .ok_or_else(|| {
                tracing::debug!(
                    "Token for {} carries no usable role claim ({:?})",
                    claims.subject_id,
                    claims.role_claim
                );
                Error::Unauthorized(INVALID_TOKEN)
            })?;

        Ok(VerifiedIdentity {
            subject_id: claims.subject_id,
            role,
            expiry: claims.expiry,
        })
    }

    /// Exact role match, no hierarchy.
    pub fn authorize(&self, identity: &VerifiedIdentity, required: Role) -> Result<()> {
        if identity.role == required {
            Ok(())
        } else {
            Err(Error::Forbidden)
        }
    }

    /// `verify` then `authorize`.
    pub async fn require(&self, credential: &str, required: Role) -> Result<VerifiedIdentity> {
        let identity = self.verify(credential).await?;
        self.authorize(&identity, required)?;
        Ok(identity)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider that accepts tokens of the form `<subject>:<role>`.
    #[derive(Default)]
    pub(crate) struct StaticProvider {
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl IdentityProvider for StaticProvider {
        async fn verify_token(&self, token: &str) -> Result<TokenClaims, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (subject, role) = token
                .split_once(':')
                .ok_or_else(|| ProviderError::Rejected("bad signature".into()))?;
            Ok(TokenClaims {
                subject_id: subject.to_string(),
                role_claim: (!role.is_empty()).then(|| role.to_string()),
                expiry: Utc::now() + chrono::Duration::hours(1),
            })
        }

        async fn set_role_claim(&self, _: &str, _: Role) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn get_by_subject_id(
            &self,
            _: &str,
        ) -> Result<Option<ProviderAccount>, ProviderError> {
            Ok(None)
        }
    }

    fn verifier() -> IdentityVerifier {
        IdentityVerifier::new(Arc::new(StaticProvider::default()))
    }

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer("Bearer abc"), Some("abc"));
        assert_eq!(parse_bearer("Token abc"), None);
        assert_eq!(parse_bearer("Bearer "), None);
        assert_eq!(parse_bearer("Bearer a b"), None);
        assert_eq!(parse_bearer("bearer abc"), None);
        assert_eq!(parse_bearer(""), None);
    }

    #[tokio::test]
    async fn test_verify_valid_token() {
        let identity = verifier().verify("Bearer doctor-1:doctor").await.unwrap();
        assert_eq!(identity.subject_id, "doctor-1");
        assert_eq!(identity.role, Role::Doctor);
    }

    #[tokio::test]
    async fn test_malformed_credential_skips_provider() {
        let provider = Arc::new(StaticProvider::default());
        let verifier = IdentityVerifier::new(provider.clone());

        let err = verifier.verify("Token abc").await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(MALFORMED_CREDENTIAL)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejected_token_is_unauthorized() {
        let err = verifier().verify("Bearer garbage").await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(INVALID_TOKEN)));
    }

    #[tokio::test]
    async fn test_missing_or_unknown_role_is_unauthorized() {
        let err = verifier().verify("Bearer u1:").await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(INVALID_TOKEN)));

        let err = verifier().verify("Bearer u1:admin").await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(INVALID_TOKEN)));
    }

    #[tokio::test]
    async fn test_authorize_exact_match_only() {
        let verifier = verifier();
        let identity = verifier.verify("Bearer h1:hospital").await.unwrap();

        assert!(verifier.authorize(&identity, Role::Hospital).is_ok());
        assert!(matches!(
            verifier.authorize(&identity, Role::Doctor),
            Err(Error::Forbidden)
        ));
    }

    #[test]
    fn test_role_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Pharmacist).unwrap(), "\"pharmacist\"");
        assert_eq!("hospital".parse::<Role>(), Ok(Role::Hospital));
    }
}
