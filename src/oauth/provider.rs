//! Google OAuth provider configuration.

use crate::config::GoogleConfig;
use anyhow::{Context, Result};
use serde::Deserialize;

/// Environment variable holding the OAuth client id
pub const CLIENT_ID_ENV: &str = "FORMRELAY_GOOGLE_CLIENT_ID";

/// Environment variable holding the OAuth client secret
pub const CLIENT_SECRET_ENV: &str = "FORMRELAY_GOOGLE_CLIENT_SECRET";

/// OAuth provider configuration
#[derive(Clone, Deserialize)]
pub struct OAuthProviderConfig {
    /// OAuth authorization endpoint URL
    pub auth_url: String,

    /// OAuth token exchange endpoint URL
    pub token_url: String,

    /// Required OAuth scopes
    pub scopes: Vec<String>,

    /// Client ID (from environment variable)
    pub client_id: String,

    /// Client secret (from environment variable)
    pub client_secret: String,
}

impl std::fmt::Debug for OAuthProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthProviderConfig")
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("scopes", &self.scopes)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .finish()
    }
}

impl OAuthProviderConfig {
    /// Endpoints and scopes from the file config, client credentials from the
    /// environment.
    pub fn from_env(google: &GoogleConfig) -> Result<Self> {
        let client_id = std::env::var(CLIENT_ID_ENV)
            .with_context(|| format!("{} is not set", CLIENT_ID_ENV))?;
        let client_secret = std::env::var(CLIENT_SECRET_ENV)
            .with_context(|| format!("{} is not set", CLIENT_SECRET_ENV))?;

        Ok(Self {
            auth_url: google.auth_url.clone(),
            token_url: google.token_url.clone(),
            scopes: google.scopes.clone(),
            client_id,
            client_secret,
        })
    }

    /// Build the consent URL.
    ///
    /// Requests offline access and forces the consent prompt so Google hands
    /// out a refresh token on every connect, not only the first one.
    pub fn build_auth_url(&self, state: &str, redirect_uri: &str) -> String {
        let scopes = self.scopes.join(" ");
        let query = serde_urlencoded::to_string([
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", scopes.as_str()),
            ("state", state),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("include_granted_scopes", "true"),
        ])
        .unwrap_or_default();

        format!("{}?{}", self.auth_url, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OAuthProviderConfig {
        OAuthProviderConfig {
            auth_url: "https://example.com/oauth/authorize".to_string(),
            token_url: "https://example.com/oauth/token".to_string(),
            scopes: vec!["read".to_string(), "write".to_string()],
            client_id: "test_client_id".to_string(),
            client_secret: "test_secret".to_string(),
        }
    }

    #[test]
    fn test_build_auth_url() {
        let url = config().build_auth_url("random_state", "http://localhost:3000/callback");

        assert!(url.starts_with("https://example.com/oauth/authorize?"));
        assert!(url.contains("client_id=test_client_id"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Fcallback"));
        // Form encoding turns the scope separator into '+'
        assert!(url.contains("scope=read+write"));
        assert!(url.contains("state=random_state"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", config());
        assert!(rendered.contains("test_client_id"));
        assert!(!rendered.contains("test_secret"));
    }
}
