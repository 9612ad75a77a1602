//! Google account connection and spreadsheet provisioning endpoints.
//!
//! `GET /api/google/callback` is reached by the browser coming back from
//! Google and authenticates through the single-use CSRF state instead of a
//! bearer token. Everything else requires an authenticated user.

use super::session::{authenticated, CurrentUser, SessionState};
use super::AppError;
use crate::catalog::CatalogRepository;
use crate::oauth::StateManager;
use crate::sheets::{ProvisionError, SpreadsheetProvisioner};
use crate::tokens::{CredentialError, TokenLifecycleManager};
use crate::users::UserRepository;
use axum::{
    extract::{Extension, Path, Query, State},
    response::{IntoResponse, Json, Redirect},
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct GoogleAppState {
    pub users: Arc<dyn UserRepository>,
    pub catalog: Arc<dyn CatalogRepository>,
    pub tokens: Arc<TokenLifecycleManager>,
    pub provisioner: Arc<SpreadsheetProvisioner>,
    pub state_manager: StateManager,
    /// Externally reachable origin, without trailing slash
    pub public_base_url: String,
}

impl GoogleAppState {
    fn redirect_uri(&self) -> String {
        format!("{}/api/google/callback", self.public_base_url)
    }
}

/// OAuth callback query parameters
#[derive(Debug, Deserialize)]
pub struct OAuthCallback {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CallbackResponse {
    success: bool,
    connected: bool,
    expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionStatus {
    connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DisconnectResponse {
    success: bool,
    was_connected: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpreadsheetResponse {
    group_id: i64,
    spreadsheet_url: String,
}

pub fn create_google_router(state: GoogleAppState, session: SessionState) -> Router {
    let protected = Router::new()
        .route("/api/google/connect", get(connect))
        .route("/api/google/status", get(status))
        .route("/api/google/connection", delete(disconnect))
        .route("/api/groups/:group_id/spreadsheet", post(ensure_spreadsheet))
        .with_state(Arc::new(state.clone()));

    Router::new()
        .route("/api/google/callback", get(callback))
        .with_state(Arc::new(state))
        .merge(authenticated(protected, session))
}

/// GET /api/google/connect
///
/// Redirects the browser to Google's consent screen.
async fn connect(
    State(state): State<Arc<GoogleAppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> impl IntoResponse {
    let csrf = state.state_manager.create_state(user.id);
    let url = state
        .tokens
        .oauth()
        .authorization_url(&csrf, &state.redirect_uri());

    info!(user_id = user.id, "Starting Google OAuth flow");
    Redirect::temporary(&url)
}

/// GET /api/google/callback?code=...&state=...
async fn callback(
    State(state): State<Arc<GoogleAppState>>,
    Query(params): Query<OAuthCallback>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(err) = params.error {
        let detail = params.error_description.unwrap_or_default();
        warn!(error = %err, description = %detail, "Google returned an OAuth error");
        return Err(AppError::BadRequest(format!("OAuth error: {} {}", err, detail).trim().to_string()));
    }

    let code = params
        .code
        .ok_or_else(|| AppError::BadRequest("Missing authorization code".to_string()))?;
    let csrf = params
        .state
        .ok_or_else(|| AppError::BadRequest("Missing state parameter".to_string()))?;

    let entry = state
        .state_manager
        .validate_and_consume(&csrf)
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired state".to_string()))?;
    let user_id = entry.user_id;

    let grant = state
        .tokens
        .oauth()
        .exchange_code(&code, &state.redirect_uri())
        .await
        .map_err(|e| {
            error!(user_id, error = %format!("{:#}", e), "Authorization code exchange failed");
            AppError::BadGateway("Failed to exchange authorization code".to_string())
        })?;

    if grant.refresh_token.is_none() {
        warn!(user_id, "Google returned no refresh token");
    }

    let expires_at = state.tokens.store_grant(user_id, &grant).map_err(|e| {
        error!(user_id, error = %format!("{:#}", e), "Failed to store Google credential");
        AppError::ServerError("Failed to store credential".to_string())
    })?;

    let connected = state
        .users
        .get_credential(user_id)
        .map_err(|e| AppError::ServerError(e.to_string()))?
        .is_some_and(|c| c.is_connected());

    info!(user_id, connected, "Google account connected");

    Ok(Json(CallbackResponse {
        success: true,
        connected,
        expires_at,
    }))
}

/// GET /api/google/status
async fn status(
    State(state): State<Arc<GoogleAppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<impl IntoResponse, AppError> {
    let credential = state
        .users
        .get_credential(user.id)
        .map_err(|e| AppError::ServerError(e.to_string()))?;

    let status = match credential {
        Some(c) if c.is_connected() => ConnectionStatus {
            connected: true,
            expires_at: c.access_token_expires_at,
        },
        _ => ConnectionStatus {
            connected: false,
            expires_at: None,
        },
    };

    Ok(Json(status))
}

/// DELETE /api/google/connection
async fn disconnect(
    State(state): State<Arc<GoogleAppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<impl IntoResponse, AppError> {
    let was_connected = state
        .users
        .clear_credential(user.id)
        .map_err(|e| AppError::ServerError(e.to_string()))?;

    info!(user_id = user.id, was_connected, "Google account disconnected");

    Ok(Json(DisconnectResponse {
        success: true,
        was_connected,
    }))
}

/// POST /api/groups/:group_id/spreadsheet
///
/// Returns the group's spreadsheet, creating it on first use.
async fn ensure_spreadsheet(
    State(state): State<Arc<GoogleAppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(group_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let group = state
        .catalog
        .get_group(group_id)
        .map_err(|e| AppError::ServerError(e.to_string()))?
        .ok_or_else(|| AppError::NotFound(format!("group {} not found", group_id)))?;

    let spreadsheet_url = state
        .provisioner
        .ensure_group_spreadsheet(user.id, group.id, &group.name)
        .await
        .map_err(|e| match e {
            ProvisionError::Credential(CredentialError::Store(e)) | ProvisionError::Store(e) => {
                error!(user_id = user.id, group_id, error = %format!("{:#}", e), "Provisioning store error");
                AppError::ServerError("Failed to provision spreadsheet".to_string())
            }
            ProvisionError::Credential(e) => AppError::Conflict(format!("Google account not usable: {}", e)),
            other => {
                warn!(user_id = user.id, group_id, error = %other, "Spreadsheet provisioning failed");
                AppError::BadGateway("Failed to create spreadsheet".to_string())
            }
        })?;

    Ok(Json(SpreadsheetResponse {
        group_id,
        spreadsheet_url,
    }))
}
