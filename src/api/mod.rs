// HTTP APIs: webhook intake, Google connection, entitlements, history

pub mod auto_refresh;
pub mod entitlements;
pub mod google;
pub mod session;
pub mod submissions;
pub mod webhook;


pub use auto_refresh::auto_refresh;
pub use entitlements::{create_entitlement_router, EntitlementAppState};
pub use google::{create_google_router, GoogleAppState};
pub use session::{authenticated, require_user, CurrentUser, SessionState};
pub use submissions::{create_submission_router, SubmissionAppState};
pub use webhook::{create_webhook_router, WebhookAppState};

use crate::catalog::{CatalogRepository, EntitlementResolver};
use crate::config::SharedRuntimeConfig;
use crate::ingestion::{IngestionPipeline, SubmissionLog};
use crate::lockout::LoginAttemptTracker;
use crate::oauth::StateManager;
use crate::sheets::SpreadsheetProvisioner;
use crate::tokens::TokenLifecycleManager;
use crate::users::UserRepository;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    Router,
};
use serde::Serialize;
use std::sync::Arc;

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Errors shared by the JSON endpoints
#[derive(Debug)]
pub(crate) enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    /// Client is locked out; value is the Retry-After in seconds
    TooManyAttempts(u64),
    PayloadTooLarge,
    ServerError(String),
    BadGateway(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::TooManyAttempts(retry_after) = self {
            let body = Json(ErrorResponse {
                error: "too many failed attempts".to_string(),
            });
            let mut resp = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                resp.headers_mut().insert(header::RETRY_AFTER, value);
            }
            return resp;
        }

        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::PayloadTooLarge => {
                (StatusCode::PAYLOAD_TOO_LARGE, "payload too large".to_string())
            }
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::TooManyAttempts(_) => (StatusCode::TOO_MANY_REQUESTS, String::new()),
        };

        (status, Json(ErrorResponse { error: error_message })).into_response()
    }
}

/// Everything the routers need, built once at startup.
#[derive(Clone)]
pub struct ApiServices {
    pub users: Arc<dyn UserRepository>,
    pub catalog: Arc<dyn CatalogRepository>,
    pub submissions: Arc<dyn SubmissionLog>,
    pub tokens: Arc<TokenLifecycleManager>,
    pub provisioner: Arc<SpreadsheetProvisioner>,
    pub pipeline: Arc<IngestionPipeline>,
    pub state_manager: StateManager,
    pub lockout: Arc<LoginAttemptTracker>,
    pub runtime_config: SharedRuntimeConfig,
    pub public_base_url: String,
}

/// Assemble every router into one application.
pub fn create_app(services: ApiServices) -> Router {
    let session = SessionState {
        users: Arc::clone(&services.users),
        lockout: Arc::clone(&services.lockout),
        tokens: Arc::clone(&services.tokens),
    };

    let webhook = create_webhook_router(WebhookAppState {
        pipeline: Arc::clone(&services.pipeline),
        runtime_config: services.runtime_config.clone(),
    });

    let google = create_google_router(
        GoogleAppState {
            users: Arc::clone(&services.users),
            catalog: Arc::clone(&services.catalog),
            tokens: Arc::clone(&services.tokens),
            provisioner: Arc::clone(&services.provisioner),
            state_manager: services.state_manager.clone(),
            public_base_url: services.public_base_url.trim_end_matches('/').to_string(),
        },
        session.clone(),
    );

    let entitlements = create_entitlement_router(
        EntitlementAppState {
            catalog: Arc::clone(&services.catalog),
            entitlements: EntitlementResolver::new(Arc::clone(&services.catalog)),
        },
        session.clone(),
    );

    let submissions = create_submission_router(
        SubmissionAppState {
            submissions: Arc::clone(&services.submissions),
        },
        session,
    );

    Router::new()
        .merge(webhook)
        .merge(google)
        .merge(entitlements)
        .merge(submissions)
}
