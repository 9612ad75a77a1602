//! User aggregate: profile, Google credential and spreadsheet bindings.
//!
//! The core talks to persistence only through [`UserRepository`]; every
//! method is an atomic single-row operation; no multi-row transactions are
//! assumed by callers.

mod store;

pub use store::SqliteUserStore;

use crate::credentials::EncryptedToken;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A registered end user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub display_name: String,
}

impl User {
    /// Name used when labelling resources provisioned for this user.
    pub fn label(&self) -> &str {
        if self.display_name.trim().is_empty() {
            &self.email
        } else {
            &self.display_name
        }
    }
}

/// Stored Google OAuth state for a user. Token fields are ciphertext only.
#[derive(Clone, Debug)]
pub struct UserCredential {
    pub user_id: i64,
    pub access_token: Option<EncryptedToken>,
    pub refresh_token: Option<EncryptedToken>,
    pub access_token_expires_at: Option<DateTime<Utc>>,
}

impl UserCredential {
    /// A user without a refresh token is not connected, whatever the access
    /// token looks like.
    pub fn is_connected(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// True when a stored access token is still valid at `now`.
    pub fn access_token_valid_at(&self, now: DateTime<Utc>) -> bool {
        match (&self.access_token, self.access_token_expires_at) {
            (Some(_), Some(expires_at)) => expires_at > now,
            _ => false,
        }
    }
}

/// New token values to persist after a code exchange or refresh.
///
/// `refresh_token: None` keeps whatever refresh token is already stored.
#[derive(Clone, Debug)]
pub struct CredentialUpdate {
    pub access_token: EncryptedToken,
    pub refresh_token: Option<EncryptedToken>,
    pub expires_at: DateTime<Utc>,
}

/// Association between a (user, group) pair and its provisioned spreadsheet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpreadsheetBinding {
    pub user_id: i64,
    pub group_id: i64,
    pub spreadsheet_id: String,
    pub spreadsheet_url: String,
    pub label: String,
    pub last_updated: DateTime<Utc>,
}

/// Outcome of inserting a binding under the (user, group) uniqueness rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingInsert {
    Inserted,
    /// Another writer already bound this (user, group) pair.
    AlreadyExists,
}

/// Persistence contract for the user aggregate.
pub trait UserRepository: Send + Sync {
    fn get_user(&self, user_id: i64) -> Result<Option<User>>;

    /// Resolves an API bearer token to its owner.
    fn find_user_by_api_token(&self, api_token: &str) -> Result<Option<User>>;

    fn get_credential(&self, user_id: i64) -> Result<Option<UserCredential>>;

    fn update_credential(&self, user_id: i64, update: &CredentialUpdate) -> Result<()>;

    /// Clears all token fields (explicit disconnect). Returns false when the
    /// user had nothing stored.
    fn clear_credential(&self, user_id: i64) -> Result<bool>;

    fn get_binding(&self, user_id: i64, group_id: i64) -> Result<Option<SpreadsheetBinding>>;

    fn insert_binding(&self, binding: &SpreadsheetBinding) -> Result<BindingInsert>;

    /// Bumps `last_updated` after a successful append.
    fn touch_binding(&self, user_id: i64, group_id: i64, at: DateTime<Utc>) -> Result<()>;
}
