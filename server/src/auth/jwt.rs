//! HS256 JWT adapter for the identity-provider capability.
//!
//! Tokens carry `sub`, an optional custom `role` claim, `iat` and `exp`. Role
//! claims set through `set_role_claim` are embedded in tokens minted by
//! `issue_token`, the same way a hosted provider applies custom claims to the
//! next token it signs.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::auth::identity::{IdentityProvider, ProviderAccount, ProviderError, Role, TokenClaims};

/// Load or generate the provider's signing secret (256-bit random).
/// Stored as raw bytes in data_dir/identity_secret.
pub fn load_or_generate_secret(data_dir: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let key_path = Path::new(data_dir).join("identity_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("Identity signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        tracing::warn!(
            "Identity key file has wrong size ({}), regenerating",
            key.len()
        );
    }

    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("Identity signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject id
    pub sub: String,
    /// Custom role claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

pub struct JwtIdentityProvider {
    secret: Vec<u8>,
    token_ttl_secs: i64,
    role_claims: DashMap<String, Role>,
}

impl JwtIdentityProvider {
    pub fn new(secret: Vec<u8>, token_ttl_secs: i64) -> Self {
        Self {
            secret,
            token_ttl_secs,
            role_claims: DashMap::new(),
        }
    }

    /// Mint a token for `subject_id` carrying its current role claim.
    pub fn issue_token(&self, subject_id: &str) -> Result<String, ProviderError> {
        let role = self.role_claims.get(subject_id).map(|r| r.to_string());
        self.sign(subject_id, role, Utc::now().timestamp() + self.token_ttl_secs)
    }

    /// Sign arbitrary claims. Lets callers produce expired or role-less tokens.
    pub fn sign(
        &self,
        subject_id: &str,
        role: Option<String>,
        exp: i64,
    ) -> Result<String, ProviderError> {
        let claims = Claims {
            sub: subject_id.to_string(),
            role,
            iat: Utc::now().timestamp(),
            exp,
        };
        encode(
            &Header::default(), // HS256
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|e| ProviderError::Unavailable(format!("token signing failed: {}", e)))
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn verify_token(&self, token: &str) -> Result<TokenClaims, ProviderError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let data = decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map_err(|e| ProviderError::Rejected(e.to_string()))?;

        let expiry = DateTime::<Utc>::from_timestamp(data.claims.exp, 0)
            .ok_or_else(|| ProviderError::Rejected("exp out of range".into()))?;

        Ok(TokenClaims {
            subject_id: data.claims.sub,
            role_claim: data.claims.role,
            expiry,
        })
    }

    async fn set_role_claim(&self, subject_id: &str, role: Role) -> Result<(), ProviderError> {
        self.role_claims.insert(subject_id.to_string(), role);
        tracing::info!("Role claim for {} set to {}", subject_id, role);
        Ok(())
    }

    async fn get_by_subject_id(
        &self,
        subject_id: &str,
    ) -> Result<Option<ProviderAccount>, ProviderError> {
        Ok(self.role_claims.get(subject_id).map(|role| ProviderAccount {
            subject_id: subject_id.to_string(),
            role: Some(*role),
        }))
    }
}
