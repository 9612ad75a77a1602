// Access checks, group listing and package purchases for the current user.

use super::session::{authenticated, CurrentUser, SessionState};
use super::AppError;
use crate::catalog::{
    record_purchase, AccessDecision, CatalogRepository, EntitlementResolver, FormGroup,
    PurchaseError, UserPackageGrant,
};
use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub struct EntitlementAppState {
    pub catalog: Arc<dyn CatalogRepository>,
    pub entitlements: EntitlementResolver,
}

#[derive(Serialize)]
struct GroupsResponse {
    groups: Vec<FormGroup>,
}

/// Purchase confirmation from the payment flow
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub amount_paid_cents: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GrantResponse {
    id: i64,
    package_id: i64,
    group_id: i64,
    activation_date: DateTime<Utc>,
    expiry_date: Option<DateTime<Utc>>,
    is_active: bool,
}

impl From<UserPackageGrant> for GrantResponse {
    fn from(grant: UserPackageGrant) -> Self {
        Self {
            id: grant.id,
            package_id: grant.package_id,
            group_id: grant.group_id,
            activation_date: grant.activation_date,
            expiry_date: grant.expiry_date,
            is_active: grant.is_active,
        }
    }
}

pub fn create_entitlement_router(state: EntitlementAppState, session: SessionState) -> Router {
    let router = Router::new()
        .route("/api/access/:form_id/:group_id", get(check_access))
        .route("/api/groups", get(list_groups))
        .route("/api/packages/:package_id/purchase", post(purchase_package))
        .with_state(Arc::new(state));

    authenticated(router, session)
}

fn store_error(e: anyhow::Error) -> AppError {
    error!(error = %format!("{:#}", e), "Catalog store error");
    AppError::ServerError("catalog unavailable".to_string())
}

/// GET /api/access/:form_id/:group_id
async fn check_access(
    State(state): State<Arc<EntitlementAppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path((form_id, group_id)): Path<(i64, i64)>,
) -> Result<Json<AccessDecision>, AppError> {
    let decision = state
        .entitlements
        .resolve_access(user.id, form_id, group_id)
        .map_err(store_error)?;
    Ok(Json(decision))
}

/// GET /api/groups
async fn list_groups(
    State(state): State<Arc<EntitlementAppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<GroupsResponse>, AppError> {
    let groups = state
        .entitlements
        .resolve_available_groups(user.id)
        .map_err(store_error)?;
    Ok(Json(GroupsResponse { groups }))
}

/// POST /api/packages/:package_id/purchase
async fn purchase_package(
    State(state): State<Arc<EntitlementAppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(package_id): Path<i64>,
    Json(req): Json<PurchaseRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.amount_paid_cents < 0 {
        return Err(AppError::BadRequest("amountPaidCents must not be negative".to_string()));
    }

    let grant = record_purchase(
        state.catalog.as_ref(),
        user.id,
        package_id,
        req.transaction_id,
        req.amount_paid_cents,
    )
    .map_err(|e| match e {
        PurchaseError::PackageNotFound(_) => AppError::NotFound(e.to_string()),
        PurchaseError::AlreadyEntitled(_) => AppError::Conflict(e.to_string()),
        PurchaseError::Store(e) => store_error(e),
    })?;

    Ok((StatusCode::CREATED, Json(GrantResponse::from(grant))))
}
