use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::db::models::{Prescription, PRESCRIPTIONS};
use crate::db::{self, DocumentStore};
use crate::error::{Error, Result};
use crate::records::patients::PatientDirectory;

#[derive(Clone)]
pub struct PrescriptionBook {
    documents: Arc<dyn DocumentStore>,
    patients: PatientDirectory,
}

impl PrescriptionBook {
    pub fn new(documents: Arc<dyn DocumentStore>, patients: PatientDirectory) -> Self {
        Self {
            documents,
            patients,
        }
    }

    pub async fn create(&self, patient_id: &str, medication: &str, dosage: u64) -> Result<Prescription> {
        let medication = medication.trim();
        if medication.is_empty() {
            return Err(Error::BadRequest("medication must not be empty".to_string()));
        }
        if dosage == 0 {
            return Err(Error::BadRequest("dosage must be positive".to_string()));
        }

        let prescription = Prescription {
            id: Uuid::now_v7().to_string(),
            user_id: patient_id.to_string(),
            medication: medication.to_string(),
            dosage,
            is_active: true,
            created_at: Utc::now(),
            dispensed_at: None,
        };
        db::set_as(self.documents.as_ref(), PRESCRIPTIONS, &prescription.id, &prescription).await?;

        tracing::info!("Prescription {} created for {}", prescription.id, patient_id);
        Ok(prescription)
    }

    /// All prescriptions for a patient, newest first.
    pub async fn for_patient(&self, patient_id: &str) -> Result<Vec<Prescription>> {
        self.list(&[("user_id", Value::from(patient_id))]).await
    }

    /// Active prescriptions for the patient holding `nfc_id`.
    pub async fn active_for_nfc(&self, nfc_id: &str) -> Result<Vec<Prescription>> {
        let patient = self.patients.find_by_nfc(nfc_id).await?;
        self.list(&[
            ("user_id", Value::from(patient.uid.as_str())),
            ("is_active", Value::Bool(true)),
        ])
        .await
    }

    /// Mark a prescription as dispensed. Dispensing twice is rejected.
    pub async fn dispense(&self, id: &str) -> Result<Prescription> {
        let mut prescription: Prescription = db::get_as(self.documents.as_ref(), PRESCRIPTIONS, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("prescription {}", id)))?;

        if !prescription.is_active {
            return Err(Error::BadRequest(format!("prescription {} already dispensed", id)));
        }

        let now = Utc::now();
        let mut fields = Map::new();
        fields.insert("is_active".to_string(), Value::Bool(false));
        fields.insert("dispensed_at".to_string(), Value::String(now.to_rfc3339()));
        self.documents.update(PRESCRIPTIONS, id, fields).await?;

        prescription.is_active = false;
        prescription.dispensed_at = Some(now);
        tracing::info!("Prescription {} dispensed", id);
        Ok(prescription)
    }

    async fn list(&self, filters: &[(&str, Value)]) -> Result<Vec<Prescription>> {
        let mut found: Vec<Prescription> = db::query_as(self.documents.as_ref(), PRESCRIPTIONS, filters)
            .await?
            .into_iter()
            .map(|(_, p)| p)
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::Role;
    use crate::db::SqliteDocumentStore;
    use crate::records::patients::tests::user;

    async fn book() -> PrescriptionBook {
        let documents: Arc<dyn DocumentStore> =
            Arc::new(SqliteDocumentStore::new(crate::db::init_memory_db().unwrap()));
        let patients = PatientDirectory::new(documents.clone());
        patients
            .register(&user("p1", "NFC123", "Ada Lovelace", Role::Patient))
            .await
            .unwrap();
        PrescriptionBook::new(documents, patients)
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let book = book().await;
        book.create("p1", "amoxicillin", 500).await.unwrap();
        book.create("p1", "ibuprofen", 200).await.unwrap();
        book.create("p2", "aspirin", 100).await.unwrap();

        let list = book.for_patient("p1").await.unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.iter().all(|p| p.is_active && p.user_id == "p1"));
    }

    #[tokio::test]
    async fn test_dispense_removes_from_active() {
        let book = book().await;
        let p = book.create("p1", "amoxicillin", 500).await.unwrap();
        book.create("p1", "ibuprofen", 200).await.unwrap();

        let dispensed = book.dispense(&p.id).await.unwrap();
        assert!(!dispensed.is_active);
        assert!(dispensed.dispensed_at.is_some());

        let active = book.active_for_nfc("NFC123").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].medication, "ibuprofen");

        // Persisted state matches what was returned
        let stored = book.for_patient("p1").await.unwrap();
        let stored = stored.iter().find(|s| s.id == p.id).unwrap();
        assert!(!stored.is_active);
        assert!(stored.dispensed_at.is_some());

        assert!(matches!(book.dispense(&p.id).await, Err(Error::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_dispense_unknown_is_not_found() {
        let book = book().await;
        assert!(matches!(book.dispense("nope").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_active_for_unknown_card() {
        let book = book().await;
        assert!(matches!(
            book.active_for_nfc("NFC000").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_input_rejected() {
        let book = book().await;
        assert!(matches!(book.create("p1", " ", 10).await, Err(Error::BadRequest(_))));
        assert!(matches!(book.create("p1", "x", 0).await, Err(Error::BadRequest(_))));
    }
}
