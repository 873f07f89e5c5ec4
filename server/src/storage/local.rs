//! Filesystem blob backend for single-node deployments and tests.
//!
//! Blobs are content-addressed by their SHA-256 hash. Storage layout:
//! `{data_dir}/blobs/{hex_hash}`. The CID is the lowercase hex hash.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::storage::backend::{BackendError, BlobBackend, Cid};

pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            root: data_dir.as_ref().join("blobs"),
        }
    }

    fn blob_path(&self, hash_hex: &str) -> PathBuf {
        self.root.join(hash_hex)
    }
}

/// A CID must be a 64-character hex SHA-256 before it is used as a file name.
fn validate_cid(cid: &Cid) -> Option<String> {
    let hash_hex = cid.as_str().to_lowercase();
    if hash_hex.len() == 64 && hex::decode(&hash_hex).is_ok() {
        Some(hash_hex)
    } else {
        None
    }
}

#[async_trait]
impl BlobBackend for LocalBackend {
    async fn add(&self, data: &[u8]) -> Result<Cid, BackendError> {
        let hash_hex = hex::encode(Sha256::digest(data));
        let path = self.blob_path(&hash_hex);

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::debug!("Blob {} already exists, skipping", hash_hex);
            return Ok(Cid::new(hash_hex));
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| BackendError::Unavailable(format!("create blobs dir: {}", e)))?;

        // Write-then-rename so a concurrent reader never sees a partial blob
        let tmp = self.root.join(format!("{}.{}.tmp", hash_hex, uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| BackendError::Unavailable(format!("write blob: {}", e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| BackendError::Unavailable(format!("commit blob: {}", e)))?;

        tracing::debug!("Stored blob {} ({} bytes)", hash_hex, data.len());
        Ok(Cid::new(hash_hex))
    }

    async fn cat(&self, cid: &Cid) -> Result<Vec<u8>, BackendError> {
        let hash_hex = validate_cid(cid).ok_or_else(|| BackendError::NotFound(cid.to_string()))?;

        match tokio::fs::read(self.blob_path(&hash_hex)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BackendError::NotFound(cid.to_string()))
            }
            Err(e) => Err(BackendError::Unavailable(format!(
                "read blob {}: {}",
                hash_hex, e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_then_cat() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());

        let cid = backend.add(b"ciphertext bytes").await.unwrap();
        assert_eq!(cid.as_str(), hex::encode(Sha256::digest(b"ciphertext bytes")));
        assert_eq!(backend.cat(&cid).await.unwrap(), b"ciphertext bytes");
    }

    #[tokio::test]
    async fn test_identical_bytes_share_cid() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());

        let a = backend.add(b"same").await.unwrap();
        let b = backend.add(b"same").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());

        let cid = Cid::new(hex::encode([7u8; 32]));
        assert_eq!(
            backend.cat(&cid).await,
            Err(BackendError::NotFound(cid.to_string()))
        );
    }

    #[tokio::test]
    async fn test_path_like_cid_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());

        let cid = Cid::new("../../etc/passwd");
        assert!(matches!(
            backend.cat(&cid).await,
            Err(BackendError::NotFound(_))
        ));
    }
}
