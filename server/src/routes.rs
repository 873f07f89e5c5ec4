use axum::Router;
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::records::routes as records;
use crate::state::AppState;

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Rate limiting on one-time routes, per peer IP
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>
    let (burst, replenish_secs) = state.one_time_rate;
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(replenish_secs.max(1))
            .burst_size(burst.max(1))
            .finish()
            .expect("Failed to build governor config"),
    );
    let governor_limiter = governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    // One-time access routes (hospital role, access gate, rate limited)
    let one_time_routes = Router::new()
        .route(
            "/api/hospital/patient/{nfc_id}",
            axum::routing::get(records::hospital_patient),
        )
        .layer(GovernorLayer {
            config: governor_config,
        });

    let patient_routes = Router::new()
        .route("/api/patient/profile", axum::routing::get(records::patient_profile))
        .route(
            "/api/patient/prescriptions",
            axum::routing::get(records::patient_prescriptions),
        )
        .route(
            "/api/patient/medical-history",
            axum::routing::get(records::patient_medical_history),
        );

    let doctor_routes = Router::new()
        .route(
            "/api/doctor/patient/{nfc_id}",
            axum::routing::get(records::doctor_patient),
        )
        .route(
            "/api/doctor/prescription",
            axum::routing::post(records::doctor_prescription),
        )
        .route(
            "/api/doctor/medical-history",
            axum::routing::post(records::doctor_medical_history),
        )
        .route(
            "/api/doctor/patients/search",
            axum::routing::get(records::doctor_search_patients),
        );

    let pharmacy_routes = Router::new()
        .route(
            "/api/pharmacy/prescriptions/active/{nfc_id}",
            axum::routing::get(records::pharmacy_active_prescriptions),
        )
        .route(
            "/api/pharmacy/prescription/dispense",
            axum::routing::post(records::pharmacy_dispense),
        );

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(one_time_routes)
        .merge(patient_routes)
        .merge(doctor_routes)
        .merge(pharmacy_routes)
        .merge(health)
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
