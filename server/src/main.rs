use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use hippocard_server::auth::jwt::{self, JwtIdentityProvider};
use hippocard_server::config::{generate_config_template, BackendKind, Config};
use hippocard_server::db::{self, DocumentStore, SqliteDocumentStore};
use hippocard_server::routes;
use hippocard_server::state::AppState;
use hippocard_server::storage::keys::Keyring;
use hippocard_server::storage::local::LocalBackend;
use hippocard_server::storage::pinning::PinningBackend;
use hippocard_server::storage::{BlobBackend, StoreClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("hippocard_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }

    tracing::info!("Hippocard server v{} starting", env!("CARGO_PKG_VERSION"));

    let access = config.access();
    let storage = config.storage();

    // Initialize SQLite document store
    let db = db::init_db(&config.data_dir)?;
    let documents: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::new(db));

    // Load or generate the identity provider's signing secret
    let secret = jwt::load_or_generate_secret(&config.data_dir)?;
    let provider = Arc::new(JwtIdentityProvider::new(
        secret,
        config.identity().token_ttl_secs as i64,
    ));

    // Record keys (data_dir/keys/*.key)
    let keyring = Arc::new(Keyring::load_or_generate(&config.data_dir)?);

    let backend: Arc<dyn BlobBackend> = match storage.backend {
        BackendKind::Pinning => {
            let pinning = PinningBackend::new(&storage.endpoint, &storage.api_key, &storage.secret)?;
            match pinning.probe().await {
                Ok(()) => tracing::info!("Pinning service reachable at {}", storage.endpoint),
                Err(e) => tracing::warn!(
                    "Pinning service at {} not reachable yet: {}",
                    storage.endpoint,
                    e
                ),
            }
            Arc::new(pinning)
        }
        BackendKind::Local => {
            tracing::info!("Storing blobs under {}/blobs", config.data_dir);
            Arc::new(LocalBackend::new(&config.data_dir))
        }
    };
    let store = StoreClient::new(backend, storage.retry_policy());

    tracing::info!(
        "One-time access: ttl {}s, key policy {:?}",
        access.ttl_secs,
        access.key_policy
    );

    let app_state = AppState::new(documents, provider, keyring, store, &access);
    let ledger = app_state.ledger.clone();

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    ledger.shutdown(access.flush_on_shutdown).await;
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
