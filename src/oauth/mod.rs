//! Google OAuth 2.0 integration.
//!
//! Implements the authorization code flow used to connect a Google account:
//! 1. User calls GET /api/google/connect → redirect to Google consent
//! 2. Google redirects to /api/google/callback with `code` and `state`
//! 3. Code is exchanged for an access/refresh token pair
//! 4. Tokens are encrypted and stored on the user record
//!
//! Refreshing later goes through the same [`OAuthProvider`] seam.

mod exchange;
mod provider;
mod state_manager;

pub use exchange::GoogleOAuthClient;
pub use provider::{OAuthProviderConfig, CLIENT_ID_ENV, CLIENT_SECRET_ENV};
pub use state_manager::{run_state_cleanup, StateEntry, StateManager};

use crate::credentials::PlainToken;
use anyhow::Result;
use async_trait::async_trait;

/// Tokens returned by the provider's token endpoint.
#[derive(Clone, Debug)]
pub struct TokenGrant {
    pub access_token: PlainToken,
    /// Usually absent on refresh; the previous refresh token stays valid.
    pub refresh_token: Option<PlainToken>,
    /// Lifetime of the access token in seconds, when the provider says.
    pub expires_in: Option<i64>,
}

/// OAuth provider contract: consent URL, code exchange, refresh exchange.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn authorization_url(&self, state: &str, redirect_uri: &str) -> String;

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant>;

    async fn refresh(&self, refresh_token: &PlainToken) -> Result<TokenGrant>;
}
