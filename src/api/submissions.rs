// Submission history for the current user.

use super::session::{authenticated, CurrentUser, SessionState};
use super::AppError;
use crate::ingestion::{SubmissionLog, SubmissionRecord};
use axum::{
    extract::{Extension, Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Clone)]
pub struct SubmissionAppState {
    pub submissions: Arc<dyn SubmissionLog>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

impl HistoryQuery {
    fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

#[derive(Serialize)]
struct HistoryResponse {
    submissions: Vec<SubmissionRecord>,
    count: usize,
}

pub fn create_submission_router(state: SubmissionAppState, session: SessionState) -> Router {
    let router = Router::new()
        .route("/api/submissions", get(list_submissions))
        .with_state(Arc::new(state));

    authenticated(router, session)
}

/// GET /api/submissions?limit=N
///
/// Newest first.
async fn list_submissions(
    State(state): State<Arc<SubmissionAppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    let submissions = state
        .submissions
        .list_for_user(user.id, query.effective_limit())
        .map_err(|e| {
            error!(user_id = user.id, error = %format!("{:#}", e), "Failed to list submissions");
            AppError::ServerError("Failed to list submissions".to_string())
        })?;

    Ok(Json(HistoryResponse {
        count: submissions.len(),
        submissions,
    }))
}
