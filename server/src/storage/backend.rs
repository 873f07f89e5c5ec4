use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Content identifier returned by the blob store on upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cid(String);

impl Cid {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The store has no blob under this CID. Never retried.
    #[error("blob {0} not found")]
    NotFound(String),

    /// Network or server-side failure worth retrying.
    #[error("blob store unavailable: {0}")]
    Unavailable(String),
}

/// Remote (or local) content-addressed blob store.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    async fn add(&self, data: &[u8]) -> Result<Cid, BackendError>;

    async fn cat(&self, cid: &Cid) -> Result<Vec<u8>, BackendError>;
}
