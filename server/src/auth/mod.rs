pub mod identity;
pub mod jwt;
pub mod middleware;

pub use identity::{IdentityProvider, IdentityVerifier, Role, VerifiedIdentity};
