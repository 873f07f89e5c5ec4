//! Record-encryption key management.
//!
//! Keys are 256-bit random secrets identified by a UUIDv7 string, so the
//! lexicographically greatest id is always the newest key. Each stored record
//! remembers the id of the key that sealed it, which keeps old records readable
//! after rotation.
//!
//! On disk: `{data_dir}/keys/{key_id}.key` (raw 32 bytes).

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::crypto::{self, KEY_SIZE};

/// A key together with the identifier persisted next to the CID.
#[derive(Clone)]
pub struct RecordKey {
    pub id: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordKey")
            .field("id", &self.id)
            .field("bytes", &"<redacted>")
            .finish()
    }
}

/// Source of record keys, injected into the record workflows.
pub trait KeyProvider: Send + Sync {
    /// Key used to seal new records.
    fn active(&self) -> Result<RecordKey>;

    /// Key that sealed an existing record.
    fn get(&self, key_id: &str) -> Result<RecordKey>;
}

pub struct Keyring {
    keys: DashMap<String, Vec<u8>>,
    active: RwLock<String>,
    dir: Option<PathBuf>,
}

impl Keyring {
    /// In-memory keyring holding a single key.
    pub fn with_key(id: impl Into<String>, bytes: Vec<u8>) -> Self {
        let id = id.into();
        let keys = DashMap::new();
        keys.insert(id.clone(), bytes);
        Self {
            keys,
            active: RwLock::new(id),
            dir: None,
        }
    }

    /// Load every key under `{data_dir}/keys`, generating a first key if none exist.
    /// Files with the wrong size are skipped with a warning.
    pub fn load_or_generate(data_dir: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let dir = Path::new(data_dir).join("keys");
        std::fs::create_dir_all(&dir)?;

        let keys = DashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("key") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let bytes = std::fs::read(&path)?;
            if bytes.len() != KEY_SIZE {
                tracing::warn!(
                    "Record key {} has wrong size ({}), ignoring",
                    path.display(),
                    bytes.len()
                );
                continue;
            }
            keys.insert(id, bytes);
        }

        let newest = keys.iter().map(|e| e.key().clone()).max();
        let keyring = Self {
            keys,
            active: RwLock::new(newest.clone().unwrap_or_default()),
            dir: Some(dir),
        };

        match newest {
            Some(id) => {
                tracing::info!(
                    "Loaded {} record key(s), active key {}",
                    keyring.keys.len(),
                    id
                );
            }
            None => {
                let id = keyring.rotate()?;
                tracing::info!("Generated first record key {}", id);
            }
        }

        Ok(keyring)
    }

    /// Mint a new key, persist it when disk-backed, and make it active.
    pub fn rotate(&self) -> Result<String> {
        let id = Uuid::now_v7().to_string();
        let key = crypto::generate_key();

        if let Some(dir) = &self.dir {
            std::fs::write(dir.join(format!("{}.key", id)), key)
                .map_err(|e| Error::Internal(format!("persist record key: {}", e)))?;
        }

        self.keys.insert(id.clone(), key.to_vec());
        let mut active = self
            .active
            .write()
            .map_err(|e| Error::Internal(format!("keyring lock: {}", e)))?;
        *active = id.clone();

        tracing::info!("Record key rotated, new active key {}", id);
        Ok(id)
    }
}

impl KeyProvider for Keyring {
    fn active(&self) -> Result<RecordKey> {
        let id = self
            .active
            .read()
            .map_err(|e| Error::Internal(format!("keyring lock: {}", e)))?
            .clone();
        self.get(&id)
    }

    fn get(&self, key_id: &str) -> Result<RecordKey> {
        self.keys
            .get(key_id)
            .map(|bytes| RecordKey {
                id: key_id.to_string(),
                bytes: bytes.clone(),
            })
            .ok_or_else(|| Error::Internal(format!("unknown record key {}", key_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generates_first_key() {
        let dir = tempfile::tempdir().unwrap();
        let keyring = Keyring::load_or_generate(dir.path().to_str().unwrap()).unwrap();

        let active = keyring.active().unwrap();
        assert_eq!(active.bytes.len(), KEY_SIZE);
        assert!(dir
            .path()
            .join("keys")
            .join(format!("{}.key", active.id))
            .exists());
    }

    #[test]
    fn test_reload_keeps_keys_and_picks_newest() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();

        let first = Keyring::load_or_generate(data_dir).unwrap();
        let old = first.active().unwrap();
        let new_id = first.rotate().unwrap();

        let reloaded = Keyring::load_or_generate(data_dir).unwrap();
        assert_eq!(reloaded.active().unwrap().id, new_id);
        assert_eq!(reloaded.get(&old.id).unwrap().bytes, old.bytes);
    }

    #[test]
    fn test_wrong_size_key_file_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let keys_dir = dir.path().join("keys");
        std::fs::create_dir_all(&keys_dir).unwrap();
        std::fs::write(keys_dir.join("short.key"), [1u8; 5]).unwrap();

        let keyring = Keyring::load_or_generate(dir.path().to_str().unwrap()).unwrap();
        assert!(keyring.get("short").is_err());
        assert_ne!(keyring.active().unwrap().id, "short");
    }

    #[test]
    fn test_debug_redacts_key_bytes() {
        let key = RecordKey {
            id: "k1".into(),
            bytes: vec![0xAB; 32],
        };
        assert!(!format!("{:?}", key).contains("171"));
    }
}
