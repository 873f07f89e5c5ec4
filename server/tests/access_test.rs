//! Integration tests for the one-time hospital access flow:
//! bearer verification -> role check -> dedup -> grant, and the status codes
//! each denial maps to.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use hippocard_server::auth::identity::IdentityProvider;
use hippocard_server::auth::jwt::JwtIdentityProvider;
use hippocard_server::auth::Role;
use hippocard_server::config::AccessConfig;
use hippocard_server::db::models::{User, TRANSACTIONS};
use hippocard_server::db::{DocumentStore, SqliteDocumentStore};
use hippocard_server::state::AppState;
use hippocard_server::storage::keys::Keyring;
use hippocard_server::storage::local::LocalBackend;
use hippocard_server::storage::{RetryPolicy, StoreClient};
use tokio::net::TcpListener;

struct TestServer {
    base_url: String,
    provider: Arc<JwtIdentityProvider>,
    state: AppState,
}

impl TestServer {
    /// Register `subject` with `role` at the provider and mint a bearer header.
    async fn bearer(&self, subject: &str, role: Role) -> String {
        self.provider.set_role_claim(subject, role).await.unwrap();
        format!("Bearer {}", self.provider.issue_token(subject).unwrap())
    }

    async fn ledger_size(&self) -> usize {
        self.state.documents.query(TRANSACTIONS, &[]).await.unwrap().len()
    }
}

/// Helper: start the server on a random port with a fresh data directory.
async fn start_test_server() -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = hippocard_server::db::init_db(&data_dir).expect("Failed to init DB");
    let documents: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::new(db));

    let secret = hippocard_server::auth::jwt::load_or_generate_secret(&data_dir)
        .expect("Failed to generate identity secret");
    let provider = Arc::new(JwtIdentityProvider::new(secret, 900));
    let keyring = Arc::new(Keyring::load_or_generate(&data_dir).expect("Failed to load keyring"));
    let store = StoreClient::new(Arc::new(LocalBackend::new(&data_dir)), RetryPolicy::default());

    let state = AppState::new(
        documents,
        provider.clone(),
        keyring,
        store,
        &AccessConfig::default(),
    );

    state
        .patients
        .register(&User {
            uid: "patient-1".to_string(),
            nfc_id: "NFC123".to_string(),
            name: "Ada Lovelace".to_string(),
            role: Role::Patient,
            wallet_address: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let app = hippocard_server::routes::build_router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        // Keep tmp_dir alive so the data directory isn't deleted
        let _keep = tmp_dir;
    });

    TestServer {
        base_url: format!("http://{}", addr),
        provider,
        state,
    }
}

#[tokio::test]
async fn test_health_check() {
    let server = start_test_server().await;

    let resp = reqwest::get(format!("{}/health", server.base_url)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_hospital_access_is_one_time() {
    let server = start_test_server().await;
    let client = reqwest::Client::new();
    let auth = server.bearer("hospital-1", Role::Hospital).await;
    let url = format!("{}/api/hospital/patient/NFC123", server.base_url);

    let resp = client
        .get(&url)
        .header("Authorization", &auth)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    let data: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(data["patient"]["nfc_id"], "NFC123");
    assert!(data["access_id"].as_str().is_some());
    assert!(data["access_time"].as_str().is_some());
    // Neither the access key nor the credential leaks into the response
    assert!(!body.contains("hospital-1_NFC123"));
    assert!(!body.contains(auth.trim_start_matches("Bearer ")));

    let resp = client
        .get(&url)
        .header("Authorization", &auth)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let err: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(err["error"], "This access has already been used");

    assert_eq!(server.ledger_size().await, 1);
}

#[tokio::test]
async fn test_other_hospital_not_blocked() {
    let server = start_test_server().await;
    let client = reqwest::Client::new();
    let url = format!("{}/api/hospital/patient/NFC123", server.base_url);

    for hospital in ["hospital-1", "hospital-2"] {
        let auth = server.bearer(hospital, Role::Hospital).await;
        let resp = client
            .get(&url)
            .header("Authorization", auth)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }
    assert_eq!(server.ledger_size().await, 2);
}

#[tokio::test]
async fn test_wrong_scheme_unauthorized_without_ledger_write() {
    let server = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/hospital/patient/NFC123", server.base_url))
        .header("Authorization", "Token abc")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    assert_eq!(server.ledger_size().await, 0);
}

#[tokio::test]
async fn test_missing_or_expired_credential_unauthorized() {
    let server = start_test_server().await;
    let client = reqwest::Client::new();
    let url = format!("{}/api/hospital/patient/NFC123", server.base_url);

    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 401);

    let expired = server
        .provider
        .sign(
            "hospital-1",
            Some("hospital".to_string()),
            Utc::now().timestamp() - 60,
        )
        .unwrap();
    let resp = client
        .get(&url)
        .header("Authorization", format!("Bearer {}", expired))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    assert_eq!(server.ledger_size().await, 0);
}

#[tokio::test]
async fn test_wrong_role_forbidden() {
    let server = start_test_server().await;
    let client = reqwest::Client::new();
    let auth = server.bearer("doctor-1", Role::Doctor).await;

    let resp = client
        .get(format!("{}/api/hospital/patient/NFC123", server.base_url))
        .header("Authorization", auth)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    assert_eq!(server.ledger_size().await, 0);
}

#[tokio::test]
async fn test_token_without_role_claim_unauthorized() {
    let server = start_test_server().await;
    let client = reqwest::Client::new();
    let token = server.provider.issue_token("nobody").unwrap();

    let resp = client
        .get(format!("{}/api/hospital/patient/NFC123", server.base_url))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_unknown_patient_not_found() {
    let server = start_test_server().await;
    let client = reqwest::Client::new();
    let auth = server.bearer("hospital-1", Role::Hospital).await;

    let resp = client
        .get(format!("{}/api/hospital/patient/NFC000", server.base_url))
        .header("Authorization", auth)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
