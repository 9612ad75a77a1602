//! OAuth token endpoint calls.
//!
//! Handles the authorization-code exchange and the refresh-token exchange.
//! Both share one response shape and one error mapping.

use super::provider::OAuthProviderConfig;
use super::{OAuthProvider, TokenGrant};
use crate::credentials::PlainToken;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// OAuth token response (standard OAuth 2.0)
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl From<TokenResponse> for TokenGrant {
    fn from(response: TokenResponse) -> Self {
        TokenGrant {
            access_token: PlainToken::new(response.access_token),
            refresh_token: response.refresh_token.map(PlainToken::new),
            expires_in: response.expires_in,
        }
    }
}

/// Google OAuth 2.0 client.
pub struct GoogleOAuthClient {
    config: OAuthProviderConfig,
    http_client: reqwest::Client,
}

impl GoogleOAuthClient {
    /// Create a client whose calls are bounded by `timeout`.
    pub fn new(config: OAuthProviderConfig, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build OAuth HTTP client")?;
        Ok(Self {
            config,
            http_client,
        })
    }

    async fn post_token_form(&self, form: &[(&str, &str)], what: &str) -> Result<TokenGrant> {
        let response = self
            .http_client
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", what))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(anyhow!("{} failed with status {}: {}", what, status, body));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", what))?;

        tracing::debug!(
            has_refresh_token = token_response.refresh_token.is_some(),
            expires_in = ?token_response.expires_in,
            "{} successful",
            what
        );

        Ok(token_response.into())
    }
}

#[async_trait]
impl OAuthProvider for GoogleOAuthClient {
    fn authorization_url(&self, state: &str, redirect_uri: &str) -> String {
        self.config.build_auth_url(state, redirect_uri)
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant> {
        self.post_token_form(
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ],
            "Token exchange",
        )
        .await
    }

    async fn refresh(&self, refresh_token: &PlainToken) -> Result<TokenGrant> {
        self.post_token_form(
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.expose()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ],
            "Token refresh",
        )
        .await
    }
}
