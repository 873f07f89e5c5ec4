use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::identity::Role;
use crate::storage::Cid;

// --- Collection names ---

pub const USERS: &str = "users";
pub const MEDICAL_HISTORY: &str = "medical_history";
pub const PRESCRIPTIONS: &str = "prescriptions";
/// One-time access records (AccessRecord).
pub const TRANSACTIONS: &str = "transactions";

/// A registered person: patient, doctor, pharmacist or hospital.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    /// Document id, equal to the identity provider's subject id
    pub uid: String,
    /// Patient NFC card identifier
    pub nfc_id: String,
    pub name: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Pointer to an encrypted history entry. The plaintext never touches the
/// document store; only the CID and the id of the sealing key do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicalHistory {
    pub id: String,
    /// Patient subject id
    pub user_id: String,
    pub cid: Cid,
    pub key_id: String,
    pub created_at: DateTime<Utc>,
}

/// Decrypted history entry returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MedicalHistoryEntry {
    pub history: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prescription {
    pub id: String,
    pub user_id: String,
    pub medication: String,
    /// Dosage amount in mg
    pub dosage: u64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispensed_at: Option<DateTime<Utc>>,
}

/// "(resource, subject) accessed at time T". Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessRecord {
    pub id: String,
    pub subject_id: String,
    pub resource_id: String,
    pub access_time: DateTime<Utc>,
}

/// Response for a one-time hospital access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HospitalPatientData {
    pub patient: User,
    pub prescriptions: Vec<Prescription>,
    pub medical_history: Vec<MedicalHistoryEntry>,
    pub access_time: DateTime<Utc>,
    /// Opaque id for this response; unrelated to the access key
    pub access_id: String,
}
