//! REST endpoints for patients, doctors, pharmacies and hospitals.
//!
//! Every handler authenticates through the identity verifier with the role
//! its route group requires. The hospital patient lookup additionally goes
//! through the one-time access gate.

use axum::{
    extract::{OriginalUri, Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::identity::Role;
use crate::auth::middleware::Credential;
use crate::db::models::{
    HospitalPatientData, MedicalHistoryEntry, Prescription, User,
};
use crate::error::{Error, Result};
use crate::state::AppState;
use crate::storage::Cid;

// --- Patient ---

/// GET /api/patient/profile
pub async fn patient_profile(
    State(state): State<AppState>,
    credential: Credential,
) -> Result<Json<User>> {
    let identity = state.verifier.require(credential.as_str(), Role::Patient).await?;
    Ok(Json(state.patients.profile(&identity.subject_id).await?))
}

/// GET /api/patient/prescriptions
pub async fn patient_prescriptions(
    State(state): State<AppState>,
    credential: Credential,
) -> Result<Json<Vec<Prescription>>> {
    let identity = state.verifier.require(credential.as_str(), Role::Patient).await?;
    Ok(Json(state.prescriptions.for_patient(&identity.subject_id).await?))
}

/// GET /api/patient/medical-history
pub async fn patient_medical_history(
    State(state): State<AppState>,
    credential: Credential,
) -> Result<Json<Vec<MedicalHistoryEntry>>> {
    let identity = state.verifier.require(credential.as_str(), Role::Patient).await?;
    Ok(Json(state.history.entries(&identity.subject_id).await?))
}

// --- Doctor ---

/// Identifies the patient a doctor is writing for, by subject id or NFC card.
#[derive(Debug, Deserialize)]
pub struct PatientRef {
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub nfc_id: Option<String>,
}

impl PatientRef {
    async fn resolve(&self, state: &AppState) -> Result<User> {
        match (&self.patient_id, &self.nfc_id) {
            (Some(id), _) => state.patients.profile(id).await,
            (None, Some(nfc_id)) => state.patients.find_by_nfc(nfc_id).await,
            (None, None) => Err(Error::BadRequest(
                "patient_id or nfc_id is required".to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePrescriptionRequest {
    #[serde(flatten)]
    pub patient: PatientRef,
    pub medication: String,
    pub dosage: u64,
}

#[derive(Debug, Serialize)]
pub struct CreatePrescriptionResponse {
    pub prescription_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AddHistoryRequest {
    #[serde(flatten)]
    pub patient: PatientRef,
    pub history: String,
}

#[derive(Debug, Serialize)]
pub struct AddHistoryResponse {
    pub doc_id: String,
    pub cid: Cid,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub name: String,
}

/// GET /api/doctor/patient/{nfc_id}
pub async fn doctor_patient(
    State(state): State<AppState>,
    credential: Credential,
    Path(nfc_id): Path<String>,
) -> Result<Json<User>> {
    state.verifier.require(credential.as_str(), Role::Doctor).await?;
    Ok(Json(state.patients.find_by_nfc(&nfc_id).await?))
}

/// POST /api/doctor/prescription
pub async fn doctor_prescription(
    State(state): State<AppState>,
    credential: Credential,
    Json(req): Json<CreatePrescriptionRequest>,
) -> Result<Json<CreatePrescriptionResponse>> {
    let doctor = state.verifier.require(credential.as_str(), Role::Doctor).await?;
    let patient = req.patient.resolve(&state).await?;

    let prescription = state
        .prescriptions
        .create(&patient.uid, &req.medication, req.dosage)
        .await?;
    tracing::info!(
        "Doctor {} prescribed {} for {}",
        doctor.subject_id,
        prescription.medication,
        patient.uid
    );

    Ok(Json(CreatePrescriptionResponse {
        prescription_id: prescription.id,
    }))
}

/// POST /api/doctor/medical-history
pub async fn doctor_medical_history(
    State(state): State<AppState>,
    credential: Credential,
    Json(req): Json<AddHistoryRequest>,
) -> Result<Json<AddHistoryResponse>> {
    let doctor = state.verifier.require(credential.as_str(), Role::Doctor).await?;
    let patient = req.patient.resolve(&state).await?;

    let doc = state.history.add_entry(&patient.uid, &req.history).await?;
    tracing::info!("Doctor {} added history entry {}", doctor.subject_id, doc.id);

    Ok(Json(AddHistoryResponse {
        doc_id: doc.id,
        cid: doc.cid,
    }))
}

/// GET /api/doctor/patients/search?name=
pub async fn doctor_search_patients(
    State(state): State<AppState>,
    credential: Credential,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<User>>> {
    state.verifier.require(credential.as_str(), Role::Doctor).await?;
    Ok(Json(state.patients.search(&params.name).await?))
}

// --- Pharmacy ---

#[derive(Debug, Deserialize)]
pub struct DispenseRequest {
    pub prescription_id: String,
}

#[derive(Debug, Serialize)]
pub struct DispenseResponse {
    pub message: &'static str,
    pub prescription: Prescription,
}

/// GET /api/pharmacy/prescriptions/active/{nfc_id}
pub async fn pharmacy_active_prescriptions(
    State(state): State<AppState>,
    credential: Credential,
    Path(nfc_id): Path<String>,
) -> Result<Json<Vec<Prescription>>> {
    state.verifier.require(credential.as_str(), Role::Pharmacist).await?;
    Ok(Json(state.prescriptions.active_for_nfc(&nfc_id).await?))
}

/// POST /api/pharmacy/prescription/dispense
pub async fn pharmacy_dispense(
    State(state): State<AppState>,
    credential: Credential,
    Json(req): Json<DispenseRequest>,
) -> Result<Json<DispenseResponse>> {
    let pharmacist = state.verifier.require(credential.as_str(), Role::Pharmacist).await?;
    let prescription = state.prescriptions.dispense(&req.prescription_id).await?;
    tracing::info!(
        "Pharmacist {} dispensed prescription {}",
        pharmacist.subject_id,
        prescription.id
    );

    Ok(Json(DispenseResponse {
        message: "Prescription dispensed",
        prescription,
    }))
}

// --- Hospital ---

/// GET /api/hospital/patient/{nfc_id}
///
/// One-time access: the first call for a (hospital, patient) pair within the
/// TTL returns the full record, later calls get 409.
pub async fn hospital_patient(
    State(state): State<AppState>,
    credential: Credential,
    OriginalUri(uri): OriginalUri,
    Path(nfc_id): Path<String>,
) -> Result<Json<HospitalPatientData>> {
    let grant = state
        .gate
        .admit(credential.as_str(), uri.path(), Role::Hospital, &nfc_id)
        .await?;

    let patient = state.patients.find_by_nfc(&nfc_id).await?;
    let prescriptions = state.prescriptions.for_patient(&patient.uid).await?;
    let medical_history = state.history.entries(&patient.uid).await?;

    tracing::info!(
        "Hospital {} received one-time record of {}",
        grant.subject_id(),
        patient.uid
    );

    Ok(Json(HospitalPatientData {
        patient,
        prescriptions,
        medical_history,
        access_time: grant.access_time,
        access_id: Uuid::new_v4().to_string(),
    }))
}
