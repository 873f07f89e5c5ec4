//! Encrypted medical history.
//!
//! Entry text is sealed under the active record key and uploaded; the
//! `medical_history` document only keeps the CID and the key id. Listing a
//! patient's history is lenient (a bad entry is logged and skipped), while
//! reading one entry by id fails on any error.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::db::models::{MedicalHistory, MedicalHistoryEntry, MEDICAL_HISTORY};
use crate::db::{self, DocumentStore};
use crate::error::{Error, Result};
use crate::records::service::RecordService;
use crate::storage::keys::KeyProvider;

#[derive(Clone)]
pub struct HistoryService {
    records: RecordService,
    documents: Arc<dyn DocumentStore>,
    keys: Arc<dyn KeyProvider>,
}

impl HistoryService {
    pub fn new(
        records: RecordService,
        documents: Arc<dyn DocumentStore>,
        keys: Arc<dyn KeyProvider>,
    ) -> Self {
        Self {
            records,
            documents,
            keys,
        }
    }

    pub async fn add_entry(&self, patient_id: &str, text: &str) -> Result<MedicalHistory> {
        self.add_entries(patient_id, &[text])
            .await?
            .pop()
            .ok_or_else(|| Error::Internal("history batch returned no entry".to_string()))
    }

    /// Seal and upload several entries as one batch. Nothing is recorded
    /// unless every upload succeeded.
    pub async fn add_entries(&self, patient_id: &str, texts: &[&str]) -> Result<Vec<MedicalHistory>> {
        if texts.is_empty() || texts.iter().any(|text| text.trim().is_empty()) {
            return Err(Error::BadRequest("history must not be empty".to_string()));
        }

        let key = self.keys.active()?;
        let plaintexts: Vec<&[u8]> = texts.iter().map(|text| text.as_bytes()).collect();
        let cids = self.records.store_many(&plaintexts, &key.bytes).await?;

        let created_at = Utc::now();
        let mut docs = Vec::with_capacity(cids.len());
        for cid in cids {
            let doc = MedicalHistory {
                id: Uuid::now_v7().to_string(),
                user_id: patient_id.to_string(),
                cid,
                key_id: key.id.clone(),
                created_at,
            };
            db::set_as(self.documents.as_ref(), MEDICAL_HISTORY, &doc.id, &doc).await?;
            tracing::info!("History entry {} stored for {} as {}", doc.id, patient_id, doc.cid);
            docs.push(doc);
        }
        Ok(docs)
    }

    /// Every readable entry for a patient, oldest first.
    pub async fn entries(&self, patient_id: &str) -> Result<Vec<MedicalHistoryEntry>> {
        let filters = [("user_id", Value::from(patient_id))];
        let mut docs: Vec<MedicalHistory> =
            db::query_as(self.documents.as_ref(), MEDICAL_HISTORY, &filters)
                .await?
                .into_iter()
                .map(|(_, doc)| doc)
                .collect();
        docs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        // Resolve keys first; an entry sealed under a key we no longer hold is skipped
        let mut readable = Vec::with_capacity(docs.len());
        for doc in docs {
            match self.keys.get(&doc.key_id) {
                Ok(key) => readable.push((doc, key)),
                Err(e) => tracing::warn!("Skipping history entry {}: {}", doc.id, e),
            }
        }

        let items: Vec<_> = readable
            .iter()
            .map(|(doc, key)| (&doc.cid, key.bytes.as_slice()))
            .collect();
        let plaintexts = self.records.fetch_many(&items).await;

        Ok(readable
            .iter()
            .zip(plaintexts)
            .filter_map(|((doc, _), plaintext)| {
                let history = String::from_utf8(plaintext?)
                    .map_err(|_| tracing::warn!("History entry {} is not UTF-8", doc.id))
                    .ok()?;
                Some(MedicalHistoryEntry {
                    history,
                    created_at: doc.created_at,
                })
            })
            .collect())
    }

    /// One entry by document id. Any failure is returned to the caller.
    pub async fn entry(&self, id: &str) -> Result<MedicalHistoryEntry> {
        let doc: MedicalHistory = db::get_as(self.documents.as_ref(), MEDICAL_HISTORY, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("history entry {}", id)))?;

        let key = self.keys.get(&doc.key_id)?;
        let plaintext = self.records.fetch(&doc.cid, &key.bytes).await?;
        let history = String::from_utf8(plaintext)
            .map_err(|_| Error::Internal(format!("history entry {} is not UTF-8", id)))?;

        Ok(MedicalHistoryEntry {
            history,
            created_at: doc.created_at,
        })
    }
}
