use std::sync::Arc;

use serde_json::Value;

use crate::auth::identity::Role;
use crate::db::models::{User, USERS};
use crate::db::{self, DocumentStore};
use crate::error::{Error, Result};

#[derive(Clone)]
pub struct PatientDirectory {
    documents: Arc<dyn DocumentStore>,
}

impl PatientDirectory {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }

    /// Create or replace the user document, keyed by subject id.
    pub async fn register(&self, user: &User) -> Result<()> {
        db::set_as(self.documents.as_ref(), USERS, &user.uid, user).await?;
        tracing::info!("Registered {} {}", user.role, user.uid);
        Ok(())
    }

    /// The patient document for a subject. Non-patients are reported as missing.
    pub async fn profile(&self, subject_id: &str) -> Result<User> {
        let user: Option<User> = db::get_as(self.documents.as_ref(), USERS, subject_id).await?;
        match user {
            Some(user) if user.role == Role::Patient => Ok(user),
            _ => Err(Error::NotFound(format!("patient {}", subject_id))),
        }
    }

    pub async fn find_by_nfc(&self, nfc_id: &str) -> Result<User> {
        let filters = [
            ("nfc_id", Value::from(nfc_id)),
            ("role", Value::from(Role::Patient.as_str())),
        ];
        let mut found: Vec<(String, User)> =
            db::query_as(self.documents.as_ref(), USERS, &filters).await?;

        if found.len() > 1 {
            tracing::warn!("{} patients share NFC id {}, using the first", found.len(), nfc_id);
        }
        if found.is_empty() {
            return Err(Error::NotFound(format!("patient with NFC id {}", nfc_id)));
        }
        Ok(found.swap_remove(0).1)
    }

    /// Case-insensitive substring match on patient names.
    pub async fn search(&self, name: &str) -> Result<Vec<User>> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return Err(Error::BadRequest("name must not be empty".to_string()));
        }

        let filters = [("role", Value::from(Role::Patient.as_str()))];
        let patients: Vec<(String, User)> =
            db::query_as(self.documents.as_ref(), USERS, &filters).await?;

        let mut matches: Vec<User> = patients
            .into_iter()
            .map(|(_, user)| user)
            .filter(|user| user.name.to_lowercase().contains(&needle))
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(matches)
    }
}
