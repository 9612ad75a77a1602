use anyhow::{Context, Result};
use formrelay::api::{create_app, ApiServices};
use formrelay::catalog::SqliteCatalogStore;
use formrelay::config::{self, new_runtime_config, CONFIG_PATH_ENV, ENCRYPTION_KEY_ENV};
use formrelay::credentials::EncryptionService;
use formrelay::ingestion::{IngestionPipeline, SqliteSubmissionStore};
use formrelay::lockout::{run_lockout_sweep, LoginAttemptTracker};
use formrelay::oauth::{run_state_cleanup, GoogleOAuthClient, OAuthProviderConfig, StateManager};
use formrelay::sheets::{GoogleSheetsClient, SpreadsheetProvisioner};
use formrelay::tokens::TokenLifecycleManager;
use formrelay::users::SqliteUserStore;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// How often expired OAuth states are swept
const STATE_CLEANUP_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "formrelay=info".into()),
        )
        .init();

    info!("Form relay starting...");

    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "formrelay.toml".to_string());
    let config = config::load_or_default(&config_path)?;

    let encryption_key = std::env::var(ENCRYPTION_KEY_ENV).with_context(|| {
        format!("{} is required (base64-encoded 32-byte key)", ENCRYPTION_KEY_ENV)
    })?;
    let encryption = EncryptionService::from_base64_key(&encryption_key)?;

    let runtime_config = new_runtime_config();
    let webhook_body_limit = runtime_config
        .read()
        .map(|c| c.webhook_body_limit_bytes)
        .unwrap_or_default();

    info!(
        config_path = %config_path,
        bind_addr = %config.server.bind_addr,
        database = %config.database.path,
        header_mode = ?config.ingestion.header_mode,
        enforce_entitlement = config.ingestion.enforce_entitlement,
        webhook_body_limit,
        "Configuration loaded"
    );

    // Stores share one SQLite file, each with its own connection
    let users = Arc::new(
        SqliteUserStore::new(&config.database.path).context("Failed to initialize user store")?,
    );
    let catalog = Arc::new(
        SqliteCatalogStore::new(&config.database.path)
            .context("Failed to initialize catalog store")?,
    );
    let submissions = Arc::new(
        SqliteSubmissionStore::new(&config.database.path)
            .context("Failed to initialize submission store")?,
    );
    info!("Stores initialized");

    // Google clients
    let timeout = Duration::from_secs(config.google.http_timeout_seconds);
    let oauth = Arc::new(GoogleOAuthClient::new(
        OAuthProviderConfig::from_env(&config.google)?,
        timeout,
    )?);
    let sheets = Arc::new(GoogleSheetsClient::new(&config.google.sheets_base_url, timeout)?);

    let tokens = Arc::new(TokenLifecycleManager::new(
        users.clone(),
        encryption,
        oauth,
        sheets,
    ));
    let provisioner = Arc::new(SpreadsheetProvisioner::new(
        users.clone(),
        Arc::clone(&tokens),
        config.ingestion.header_mode,
    ));
    let pipeline = Arc::new(IngestionPipeline::new(
        catalog.clone(),
        Arc::clone(&tokens),
        Arc::clone(&provisioner),
        submissions.clone(),
        config.ingestion.enforce_entitlement,
    ));

    // Background sweeps
    let state_manager = StateManager::new(config.oauth.state_expiry_seconds);
    tokio::spawn(run_state_cleanup(
        state_manager.clone(),
        STATE_CLEANUP_INTERVAL_SECS,
    ));

    let lockout = Arc::new(LoginAttemptTracker::new(
        config.lockout.max_attempts,
        Duration::from_secs(config.lockout.window_seconds),
    ));
    tokio::spawn(run_lockout_sweep(
        Arc::clone(&lockout),
        config.lockout.sweep_interval_seconds,
    ));

    let app = create_app(ApiServices {
        users,
        catalog,
        submissions,
        tokens,
        provisioner,
        pipeline,
        state_manager,
        lockout,
        runtime_config,
        public_base_url: config.server.public_base_url.clone(),
    })
    .layer(CorsLayer::permissive())
    .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "HTTP server listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("Form relay stopped");

    Ok(())
}
