//! Seal-and-store / fetch-and-open over the content-addressed store.

use crate::error::Result;
use crate::storage::{crypto, Cid, StoreClient};

#[derive(Clone)]
pub struct RecordService {
    store: StoreClient,
}

impl RecordService {
    pub fn new(store: StoreClient) -> Self {
        Self { store }
    }

    /// Encrypt then upload. Either failure propagates unchanged.
    pub async fn store(&self, plaintext: &[u8], key: &[u8]) -> Result<Cid> {
        let sealed = crypto::encrypt(plaintext, key)?;
        self.store.upload(&sealed).await
    }

    /// Encrypt every payload, then upload them as one all-or-nothing batch.
    /// CIDs come back in input order.
    pub async fn store_many(&self, plaintexts: &[&[u8]], key: &[u8]) -> Result<Vec<Cid>> {
        let sealed = plaintexts
            .iter()
            .map(|plaintext| crypto::encrypt(plaintext, key))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.store.upload_batch(sealed).await
    }

    /// Download then decrypt.
    pub async fn fetch(&self, cid: &Cid, key: &[u8]) -> Result<Vec<u8>> {
        let sealed = self.store.download(cid).await?;
        Ok(crypto::decrypt(&sealed, key)?)
    }

    /// Best-effort bulk fetch: one slot per input, `None` where the blob was
    /// unavailable or did not decrypt.
    pub async fn fetch_many(&self, items: &[(&Cid, &[u8])]) -> Vec<Option<Vec<u8>>> {
        let mut out = Vec::with_capacity(items.len());
        for (cid, key) in items {
            match self.fetch(cid, key).await {
                Ok(plaintext) => out.push(Some(plaintext)),
                Err(e) => {
                    tracing::warn!("Skipping record {}: {}", cid, e);
                    out.push(None);
                }
            }
        }
        out
    }
}
