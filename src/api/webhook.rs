// Webhook intake for form submissions.
//
// The form provider posts each submission here. The URL carries the
// destination (user, form, group); no bearer token is involved.

use super::AppError;
use crate::config::SharedRuntimeConfig;
use crate::ingestion::{IngestionPipeline, WebhookOutcome};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct WebhookAppState {
    pub pipeline: Arc<IngestionPipeline>,
    pub runtime_config: SharedRuntimeConfig,
}

/// Reply to the form provider.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    submission_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    row_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<&WebhookOutcome> for WebhookResponse {
    fn from(outcome: &WebhookOutcome) -> Self {
        Self {
            success: outcome.success(),
            submission_id: outcome.submission_id.clone(),
            row_number: outcome.row_number(),
            error: outcome.error_message(),
        }
    }
}

pub fn create_webhook_router(state: WebhookAppState) -> Router {
    Router::new()
        .route(
            "/api/webhook/jotform/:user_id/:form_id/:group_id",
            post(receive_submission),
        )
        // The runtime limit checked in the handler is the only cap.
        .layer(DefaultBodyLimit::disable())
        .with_state(Arc::new(state))
}

/// POST /api/webhook/jotform/:user_id/:form_id/:group_id
async fn receive_submission(
    State(state): State<Arc<WebhookAppState>>,
    Path((user_id, form_id, group_id)): Path<(i64, i64, i64)>,
    body: Bytes,
) -> Result<Response, AppError> {
    let limit = state
        .runtime_config
        .read()
        .map_err(|_| AppError::ServerError("runtime config unavailable".to_string()))?
        .webhook_body_limit_bytes;
    if body.len() > limit {
        warn!(user_id, form_id, group_id, size = body.len(), limit, "Webhook body too large");
        return Err(AppError::PayloadTooLarge);
    }

    debug!(user_id, form_id, group_id, size = body.len(), "Webhook received");

    let outcome = state
        .pipeline
        .process_webhook(&body, user_id, form_id, group_id)
        .await;

    let status = match outcome.error() {
        None => StatusCode::OK,
        Some(e) if e.is_unexpected() => StatusCode::INTERNAL_SERVER_ERROR,
        Some(_) => StatusCode::BAD_REQUEST,
    };

    Ok((status, Json(WebhookResponse::from(&outcome))).into_response())
}
