//! Access-token lifecycle for connected Google accounts.
//!
//! [`TokenLifecycleManager::authorized_client`] hands out a Sheets client
//! only when it holds a non-expired access token, refreshing through the
//! [`OAuthProvider`] when the stored one has lapsed. Refreshes are not
//! serialized per user; concurrent callers may each refresh and each
//! persists a valid token.

use crate::credentials::{EncryptionService, PlainToken};
use crate::oauth::{OAuthProvider, TokenGrant};
use crate::sheets::{AuthorizedSheets, SheetsApi};
use crate::users::{CredentialUpdate, UserCredential, UserRepository};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Access-token lifetime assumed when the provider does not report one.
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Why no usable client could be produced.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no Google credential stored")]
    NoCredential,
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("credential store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

pub struct TokenLifecycleManager {
    users: Arc<dyn UserRepository>,
    encryption: EncryptionService,
    oauth: Arc<dyn OAuthProvider>,
    sheets: Arc<dyn SheetsApi>,
}

impl TokenLifecycleManager {
    pub fn new(
        users: Arc<dyn UserRepository>,
        encryption: EncryptionService,
        oauth: Arc<dyn OAuthProvider>,
        sheets: Arc<dyn SheetsApi>,
    ) -> Self {
        Self {
            users,
            encryption,
            oauth,
            sheets,
        }
    }

    pub fn oauth(&self) -> &Arc<dyn OAuthProvider> {
        &self.oauth
    }

    /// A Sheets client carrying a valid access token for `user_id`.
    pub async fn authorized_client(&self, user_id: i64) -> Result<AuthorizedSheets, CredentialError> {
        let credential = self.connected_credential(user_id)?;

        if credential.access_token_valid_at(Utc::now()) {
            return Ok(self.client_from(&credential)?);
        }

        if let Err(e) = self.try_refresh(user_id, &credential).await {
            warn!(user_id, error = %format!("{:#}", e), "Access token refresh failed");
            return Err(CredentialError::RefreshFailed(format!("{:#}", e)));
        }

        // Reload so the client is built from what was actually persisted.
        let refreshed = self.connected_credential(user_id)?;
        Ok(self.client_from(&refreshed)?)
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// Returns false on any failure; the stored credential is left as it was
    /// so a later attempt can retry with the same refresh token.
    pub async fn refresh_access_token(&self, user_id: i64) -> bool {
        let credential = match self.users.get_credential(user_id) {
            Ok(Some(credential)) if credential.is_connected() => credential,
            Ok(_) => {
                warn!(user_id, "No refresh token stored, skipping refresh");
                return false;
            }
            Err(e) => {
                warn!(user_id, error = %e, "Failed to load credential for refresh");
                return false;
            }
        };

        match self.try_refresh(user_id, &credential).await {
            Ok(()) => true,
            Err(e) => {
                warn!(user_id, error = %format!("{:#}", e), "Access token refresh failed");
                false
            }
        }
    }

    /// True when the user is connected but holds no valid access token.
    pub fn is_access_token_expired(&self, user_id: i64) -> Result<bool> {
        Ok(match self.users.get_credential(user_id)? {
            Some(credential) if credential.is_connected() => {
                !credential.access_token_valid_at(Utc::now())
            }
            _ => false,
        })
    }

    /// Encrypt and persist tokens from a code exchange or refresh.
    ///
    /// A grant without a refresh token keeps the stored one.
    pub fn store_grant(&self, user_id: i64, grant: &TokenGrant) -> Result<DateTime<Utc>> {
        let expires_at = Utc::now()
            + Duration::seconds(grant.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS));

        let update = CredentialUpdate {
            access_token: self
                .encryption
                .seal(&grant.access_token)
                .context("Failed to encrypt access token")?,
            refresh_token: grant
                .refresh_token
                .as_ref()
                .map(|t| self.encryption.seal(t))
                .transpose()
                .context("Failed to encrypt refresh token")?,
            expires_at,
        };

        self.users
            .update_credential(user_id, &update)
            .context("Failed to persist credential")?;

        Ok(expires_at)
    }

    fn connected_credential(&self, user_id: i64) -> Result<UserCredential, CredentialError> {
        match self.users.get_credential(user_id)? {
            Some(credential) if credential.is_connected() => Ok(credential),
            _ => Err(CredentialError::NoCredential),
        }
    }

    fn client_from(&self, credential: &UserCredential) -> Result<AuthorizedSheets> {
        let sealed = credential
            .access_token
            .as_ref()
            .context("Access token missing after refresh")?;
        let token = self
            .encryption
            .decrypt(sealed)
            .context("Failed to decrypt access token")?;
        Ok(AuthorizedSheets::new(token, Arc::clone(&self.sheets)))
    }

    async fn try_refresh(&self, user_id: i64, credential: &UserCredential) -> Result<()> {
        let sealed = credential
            .refresh_token
            .as_ref()
            .context("No refresh token stored")?;
        let refresh_token: PlainToken = self
            .encryption
            .decrypt(sealed)
            .context("Failed to decrypt refresh token")?;

        info!(user_id, "Refreshing Google access token");

        let grant = self.oauth.refresh(&refresh_token).await?;
        let expires_at = self.store_grant(user_id, &grant)?;

        info!(user_id, expires_at = %expires_at, "Google access token refreshed");
        Ok(())
    }
}
