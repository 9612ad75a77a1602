//! Authenticated-user resolution for the JSON API.
//!
//! Requests carry a per-user API token as `Authorization: Bearer <token>`.
//! Bad tokens count against the client's lockout budget; a locked client
//! gets 429 before its token is even looked at.

use super::auto_refresh::auto_refresh;
use super::AppError;
use crate::auth::{client_identifier, extract_bearer_token, TokenError};
use crate::lockout::LoginAttemptTracker;
use crate::tokens::TokenLifecycleManager;
use crate::users::{User, UserRepository};
use axum::{
    extract::{Request, State},
    middleware::{from_fn_with_state, Next},
    response::Response,
    Router,
};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Dependencies of the authentication and auto-refresh middleware
#[derive(Clone)]
pub struct SessionState {
    pub users: Arc<dyn UserRepository>,
    pub lockout: Arc<LoginAttemptTracker>,
    pub tokens: Arc<TokenLifecycleManager>,
}

/// The resolved caller, placed in request extensions by [`require_user`].
#[derive(Clone, Debug)]
pub struct CurrentUser(pub User);

/// Resolve the bearer token to a user or reject the request.
pub async fn require_user(
    State(session): State<SessionState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let client = client_identifier(request.headers());

    if session.lockout.is_locked(&client) {
        warn!(client = %client, "Rejecting request from locked-out client");
        return Err(AppError::TooManyAttempts(session.lockout.window().as_secs()));
    }

    let token = match extract_bearer_token(request.headers()) {
        Ok(token) => token,
        // No credentials offered at all is not a guess.
        Err(TokenError::Missing) => {
            return Err(AppError::Unauthorized(TokenError::Missing.to_string()))
        }
        Err(e) => {
            session.lockout.record_failure(&client);
            return Err(AppError::Unauthorized(e.to_string()));
        }
    };

    let user = session
        .users
        .find_user_by_api_token(&token)
        .map_err(|e| {
            error!(error = %e, "Failed to look up API token");
            AppError::ServerError("Failed to authenticate request".to_string())
        })?;

    match user {
        Some(user) => {
            session.lockout.reset(&client);
            debug!(user_id = user.id, "Request authenticated");
            request.extensions_mut().insert(CurrentUser(user));
            Ok(next.run(request).await)
        }
        None => {
            let remaining = session.lockout.record_failure(&client);
            warn!(client = %client, remaining, "Unknown API token");
            if remaining == 0 {
                return Err(AppError::TooManyAttempts(session.lockout.window().as_secs()));
            }
            Err(AppError::Unauthorized("Invalid API token".to_string()))
        }
    }
}

/// Wrap `router` so every matched route requires an authenticated user and
/// opportunistically refreshes that user's Google token.
pub fn authenticated(router: Router, session: SessionState) -> Router {
    // Layers run outermost-last: authentication first, then refresh.
    router
        .route_layer(from_fn_with_state(session.clone(), auto_refresh))
        .route_layer(from_fn_with_state(session, require_user))
}
