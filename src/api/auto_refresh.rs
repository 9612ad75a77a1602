// Opportunistic Google token refresh on authenticated requests.
//
// Talks to the provider only when the stored access token has already
// expired. Failures are logged and never change the response.

use super::session::{CurrentUser, SessionState};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

pub async fn auto_refresh(
    State(session): State<SessionState>,
    request: Request,
    next: Next,
) -> Response {
    let user_id = request
        .extensions()
        .get::<CurrentUser>()
        .map(|current| current.0.id);

    if let Some(user_id) = user_id {
        match session.tokens.is_access_token_expired(user_id) {
            Ok(true) => {
                if session.tokens.refresh_access_token(user_id).await {
                    debug!(user_id, "Refreshed expired Google token before request");
                } else {
                    warn!(user_id, "Opportunistic Google token refresh failed");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(user_id, error = %e, "Failed to check Google token expiry"),
        }
    }

    next.run(request).await
}
