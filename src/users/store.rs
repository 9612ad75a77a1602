//! SQLite-backed user store.
//!
//! Holds user profiles, their encrypted Google tokens and spreadsheet
//! bindings. Token columns only ever contain [`EncryptedToken`] values.

use super::{BindingInsert, CredentialUpdate, SpreadsheetBinding, User, UserCredential, UserRepository};
use crate::credentials::EncryptedToken;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// User store backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE users (
///     id INTEGER PRIMARY KEY,
///     email TEXT NOT NULL UNIQUE,
///     display_name TEXT NOT NULL,
///     api_token TEXT UNIQUE,
///     google_access_token TEXT,         -- Encrypted
///     google_refresh_token TEXT,        -- Encrypted
///     google_token_expires_at TEXT,     -- RFC 3339
///     created_at TEXT NOT NULL
/// );
/// CREATE TABLE spreadsheet_bindings (
///     id INTEGER PRIMARY KEY,
///     user_id INTEGER NOT NULL,
///     group_id INTEGER NOT NULL,
///     spreadsheet_id TEXT NOT NULL,
///     spreadsheet_url TEXT NOT NULL,
///     label TEXT NOT NULL,
///     created_at TEXT NOT NULL,
///     last_updated TEXT NOT NULL,
///     UNIQUE(user_id, group_id)
/// );
/// ```
///
/// # Thread Safety
/// The connection is wrapped in a Mutex; every method holds it for a single
/// statement only.
pub struct SqliteUserStore {
    conn: Mutex<Connection>,
}

impl SqliteUserStore {
    /// Creates or opens the store at `db_path` (`":memory:"` for tests).
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open user database")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL,
                api_token TEXT UNIQUE,
                google_access_token TEXT,
                google_refresh_token TEXT,
                google_token_expires_at TEXT,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS spreadsheet_bindings (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                group_id INTEGER NOT NULL,
                spreadsheet_id TEXT NOT NULL,
                spreadsheet_url TEXT NOT NULL,
                label TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_updated TEXT NOT NULL,
                UNIQUE(user_id, group_id)
            );
            "#,
        )
        .context("Failed to create user tables")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("User store connection mutex poisoned"))
    }

    /// Registers a user. Account management lives outside the relay; this
    /// exists for provisioning scripts and tests.
    pub fn create_user(&self, email: &str, display_name: &str, api_token: &str) -> Result<User> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (email, display_name, api_token, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![email, display_name, api_token, Utc::now().to_rfc3339()],
        )
        .context("Failed to insert user")?;

        Ok(User {
            id: conn.last_insert_rowid(),
            email: email.to_string(),
            display_name: display_name.to_string(),
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Failed to parse timestamp '{}'", value))
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
    })
}

impl UserRepository for SqliteUserStore {
    fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        self.conn()?
            .query_row(
                "SELECT id, email, display_name FROM users WHERE id = ?1",
                params![user_id],
                user_from_row,
            )
            .optional()
            .context("Failed to load user")
    }

    fn find_user_by_api_token(&self, api_token: &str) -> Result<Option<User>> {
        self.conn()?
            .query_row(
                "SELECT id, email, display_name FROM users WHERE api_token = ?1",
                params![api_token],
                user_from_row,
            )
            .optional()
            .context("Failed to look up user by API token")
    }

    fn get_credential(&self, user_id: i64) -> Result<Option<UserCredential>> {
        let row = self
            .conn()?
            .query_row(
                r#"
                SELECT google_access_token, google_refresh_token, google_token_expires_at
                FROM users
                WHERE id = ?1
                "#,
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()
            .context("Failed to load credential")?;

        let Some((access_token, refresh_token, expires_at)) = row else {
            return Ok(None);
        };

        let access_token_expires_at = expires_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .context("Failed to parse google_token_expires_at")?;

        Ok(Some(UserCredential {
            user_id,
            access_token: access_token.map(EncryptedToken::from_ciphertext),
            refresh_token: refresh_token.map(EncryptedToken::from_ciphertext),
            access_token_expires_at,
        }))
    }

    fn update_credential(&self, user_id: i64, update: &CredentialUpdate) -> Result<()> {
        // COALESCE keeps the stored refresh token when the provider did not rotate it
        let rows = self
            .conn()?
            .execute(
                r#"
                UPDATE users SET
                    google_access_token = ?2,
                    google_refresh_token = COALESCE(?3, google_refresh_token),
                    google_token_expires_at = ?4
                WHERE id = ?1
                "#,
                params![
                    user_id,
                    update.access_token.as_str(),
                    update.refresh_token.as_ref().map(|t| t.as_str()),
                    update.expires_at.to_rfc3339(),
                ],
            )
            .context("Failed to update credential")?;

        if rows == 0 {
            return Err(anyhow!("User {} not found", user_id));
        }
        Ok(())
    }

    fn clear_credential(&self, user_id: i64) -> Result<bool> {
        let rows = self
            .conn()?
            .execute(
                r#"
                UPDATE users SET
                    google_access_token = NULL,
                    google_refresh_token = NULL,
                    google_token_expires_at = NULL
                WHERE id = ?1 AND google_refresh_token IS NOT NULL
                "#,
                params![user_id],
            )
            .context("Failed to clear credential")?;

        Ok(rows > 0)
    }

    fn get_binding(&self, user_id: i64, group_id: i64) -> Result<Option<SpreadsheetBinding>> {
        let row = self
            .conn()?
            .query_row(
                r#"
                SELECT spreadsheet_id, spreadsheet_url, label, last_updated
                FROM spreadsheet_bindings
                WHERE user_id = ?1 AND group_id = ?2
                "#,
                params![user_id, group_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .context("Failed to load spreadsheet binding")?;

        row.map(
            |(spreadsheet_id, spreadsheet_url, label, last_updated)| -> Result<SpreadsheetBinding> {
                Ok(SpreadsheetBinding {
                    user_id,
                    group_id,
                    spreadsheet_id,
                    spreadsheet_url,
                    label,
                    last_updated: parse_timestamp(&last_updated)?,
                })
            },
        )
        .transpose()
    }

    fn insert_binding(&self, binding: &SpreadsheetBinding) -> Result<BindingInsert> {
        let now = Utc::now().to_rfc3339();
        let rows = self
            .conn()?
            .execute(
                r#"
                INSERT OR IGNORE INTO spreadsheet_bindings (
                    user_id, group_id, spreadsheet_id, spreadsheet_url, label,
                    created_at, last_updated
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    binding.user_id,
                    binding.group_id,
                    binding.spreadsheet_id,
                    binding.spreadsheet_url,
                    binding.label,
                    now,
                    binding.last_updated.to_rfc3339(),
                ],
            )
            .context("Failed to insert spreadsheet binding")?;

        Ok(if rows == 0 {
            BindingInsert::AlreadyExists
        } else {
            BindingInsert::Inserted
        })
    }

    fn touch_binding(&self, user_id: i64, group_id: i64, at: DateTime<Utc>) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE spreadsheet_bindings SET last_updated = ?3 WHERE user_id = ?1 AND group_id = ?2",
                params![user_id, group_id, at.to_rfc3339()],
            )
            .context("Failed to update binding timestamp")?;
        Ok(())
    }
}
