//! Lazily provisions one spreadsheet per (user, group) and one tab per form.

use super::{header_range, parse_row_number, quote_tab, AuthorizedSheets, HeaderMode};
use crate::tokens::{CredentialError, TokenLifecycleManager};
use crate::users::{BindingInsert, SpreadsheetBinding, UserRepository};
use anyhow::anyhow;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Title of the fixed tab describing the spreadsheet.
pub const INFO_TAB: &str = "Info";

/// First column of every form tab.
pub const SUBMITTED_AT_HEADER: &str = "Submitted At";

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("no spreadsheet bound for user {user_id}, group {group_id}")]
    BindingMissing { user_id: i64, group_id: i64 },
    #[error("spreadsheet binding for user {user_id}, group {group_id} conflicted and could not be reloaded")]
    Conflict { user_id: i64, group_id: i64 },
    #[error("tab '{0}' has no header row")]
    HeaderMissing(String),
    #[error("spreadsheet provider error: {0:#}")]
    Provider(anyhow::Error),
    #[error("store error: {0:#}")]
    Store(anyhow::Error),
}

pub struct SpreadsheetProvisioner {
    users: Arc<dyn UserRepository>,
    tokens: Arc<TokenLifecycleManager>,
    header_mode: HeaderMode,
    locks: DashMap<(i64, i64), Arc<Mutex<()>>>,
}

impl SpreadsheetProvisioner {
    pub fn new(
        users: Arc<dyn UserRepository>,
        tokens: Arc<TokenLifecycleManager>,
        header_mode: HeaderMode,
    ) -> Self {
        Self {
            users,
            tokens,
            header_mode,
            locks: DashMap::new(),
        }
    }

    pub fn header_mode(&self) -> HeaderMode {
        self.header_mode
    }

    /// Return the bound spreadsheet's URL, creating the spreadsheet first
    /// when the (user, group) pair has none.
    pub async fn ensure_group_spreadsheet(
        &self,
        user_id: i64,
        group_id: i64,
        group_label: &str,
    ) -> Result<String, ProvisionError> {
        if let Some(binding) = self.binding(user_id, group_id)? {
            return Ok(binding.spreadsheet_url);
        }

        let key = (user_id, group_id);
        let lock = Arc::clone(self.locks.entry(key).or_default().value());
        let result = {
            let _guard = lock.lock().await;
            self.create_group_spreadsheet(user_id, group_id, group_label)
                .await
        };
        drop(lock);
        self.locks.remove_if(&key, |_, l| Arc::strong_count(l) == 1);

        result
    }

    async fn create_group_spreadsheet(
        &self,
        user_id: i64,
        group_id: i64,
        group_label: &str,
    ) -> Result<String, ProvisionError> {
        // Another task may have finished while we waited for the lock.
        if let Some(binding) = self.binding(user_id, group_id)? {
            return Ok(binding.spreadsheet_url);
        }

        let client = self.tokens.authorized_client(user_id).await?;

        let owner = self
            .users
            .get_user(user_id)
            .map_err(ProvisionError::Store)?
            .map(|u| u.label().to_string())
            .unwrap_or_else(|| format!("User {}", user_id));

        let now = Utc::now();
        let title = format!("{} - {} - {}", owner, group_label, now.format("%Y-%m-%d"));

        let created = client
            .create_spreadsheet(&title, &[INFO_TAB.to_string()])
            .await
            .map_err(ProvisionError::Provider)?;

        let binding = SpreadsheetBinding {
            user_id,
            group_id,
            spreadsheet_id: created.spreadsheet_id,
            spreadsheet_url: created.spreadsheet_url,
            label: title,
            last_updated: now,
        };

        // Bind first; an info-tab failure must not leave the spreadsheet unbound.
        match self
            .users
            .insert_binding(&binding)
            .map_err(ProvisionError::Store)?
        {
            BindingInsert::Inserted => {
                info!(
                    user_id,
                    group_id,
                    spreadsheet_id = %binding.spreadsheet_id,
                    "Provisioned group spreadsheet"
                );
            }
            BindingInsert::AlreadyExists => {
                warn!(
                    user_id,
                    group_id,
                    orphaned_spreadsheet_id = %binding.spreadsheet_id,
                    "Binding created concurrently, using the existing spreadsheet"
                );
                return self
                    .binding(user_id, group_id)?
                    .map(|existing| existing.spreadsheet_url)
                    .ok_or(ProvisionError::Conflict { user_id, group_id });
            }
        }

        let info = vec![
            vec!["Group".to_string(), group_label.to_string()],
            vec!["Created".to_string(), now.format("%Y-%m-%d %H:%M:%S UTC").to_string()],
        ];
        if let Err(e) = client
            .update_range(
                &binding.spreadsheet_id,
                &format!("{}!A1:B2", quote_tab(INFO_TAB)),
                info,
            )
            .await
        {
            warn!(
                user_id,
                group_id,
                spreadsheet_id = %binding.spreadsheet_id,
                error = %e,
                "Failed to write info tab"
            );
        }

        Ok(binding.spreadsheet_url)
    }

    /// Make sure the form's tab exists and its header row reflects `fields`.
    ///
    /// The header is always rewritten and restyled.
    pub async fn ensure_form_tab(
        &self,
        user_id: i64,
        group_id: i64,
        form_label: &str,
        fields: &[String],
    ) -> Result<(), ProvisionError> {
        let binding = self.require_binding(user_id, group_id)?;
        let client = self.tokens.authorized_client(user_id).await?;
        let spreadsheet_id = binding.spreadsheet_id.as_str();

        let tabs = client
            .list_tabs(spreadsheet_id)
            .await
            .map_err(ProvisionError::Provider)?;

        let (sheet_id, existing) = match tabs.into_iter().find(|t| t.title == form_label) {
            Some(tab) => {
                let existing = read_header(&client, spreadsheet_id, form_label).await?;
                (tab.sheet_id, existing)
            }
            None => {
                let tab = client
                    .add_tab(spreadsheet_id, form_label)
                    .await
                    .map_err(ProvisionError::Provider)?;
                debug!(user_id, group_id, tab = form_label, "Created form tab");
                (tab.sheet_id, Vec::new())
            }
        };

        let header = compute_header(self.header_mode, &existing, fields);
        let column_count = header.len();

        client
            .update_range(spreadsheet_id, &header_range(form_label), vec![header])
            .await
            .map_err(ProvisionError::Provider)?;
        client
            .format_header(spreadsheet_id, sheet_id, column_count)
            .await
            .map_err(ProvisionError::Provider)?;

        Ok(())
    }

    /// Append one submission under the tab's current header. Returns the
    /// 1-based row number written.
    pub async fn append_row(
        &self,
        user_id: i64,
        group_id: i64,
        form_label: &str,
        values: &BTreeMap<String, String>,
    ) -> Result<i64, ProvisionError> {
        let binding = self.require_binding(user_id, group_id)?;
        let client = self.tokens.authorized_client(user_id).await?;
        let spreadsheet_id = binding.spreadsheet_id.as_str();

        let header = read_header(&client, spreadsheet_id, form_label).await?;
        if header.is_empty() {
            return Err(ProvisionError::HeaderMissing(form_label.to_string()));
        }

        if !header.iter().any(|name| name == SUBMITTED_AT_HEADER) {
            warn!(user_id, group_id, tab = form_label, "Tab has no submission time column");
        }

        let submitted_at = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let row: Vec<String> = header
            .iter()
            .map(|name| match name.as_str() {
                SUBMITTED_AT_HEADER => submitted_at.clone(),
                _ => values.get(name).cloned().unwrap_or_default(),
            })
            .collect();

        let updated_range = client
            .append_range(
                spreadsheet_id,
                &format!("{}!A1", quote_tab(form_label)),
                vec![row],
            )
            .await
            .map_err(ProvisionError::Provider)?;

        let row_number = parse_row_number(&updated_range).ok_or_else(|| {
            ProvisionError::Provider(anyhow!("Unrecognised append range: {}", updated_range))
        })?;

        if let Err(e) = self.users.touch_binding(user_id, group_id, Utc::now()) {
            warn!(user_id, group_id, error = %e, "Failed to bump binding timestamp");
        }

        Ok(row_number)
    }

    fn binding(&self, user_id: i64, group_id: i64) -> Result<Option<SpreadsheetBinding>, ProvisionError> {
        self.users
            .get_binding(user_id, group_id)
            .map_err(ProvisionError::Store)
    }

    fn require_binding(&self, user_id: i64, group_id: i64) -> Result<SpreadsheetBinding, ProvisionError> {
        self.binding(user_id, group_id)?
            .ok_or(ProvisionError::BindingMissing { user_id, group_id })
    }
}

/// First row of a tab, without trailing blank cells.
async fn read_header(
    client: &AuthorizedSheets,
    spreadsheet_id: &str,
    tab: &str,
) -> Result<Vec<String>, ProvisionError> {
    let rows = client
        .read_range(spreadsheet_id, &header_range(tab))
        .await
        .map_err(ProvisionError::Provider)?;
    let mut header = rows.into_iter().next().unwrap_or_default();
    while header.last().is_some_and(|cell| cell.trim().is_empty()) {
        header.pop();
    }
    Ok(header)
}

/// Header row to write for `fields` given what the tab currently holds.
///
/// Replace mode pads with blanks so stale trailing columns are cleared.
fn compute_header(mode: HeaderMode, existing: &[String], fields: &[String]) -> Vec<String> {
    let fresh = || {
        std::iter::once(SUBMITTED_AT_HEADER.to_string())
            .chain(fields.iter().cloned())
            .collect::<Vec<_>>()
    };

    match mode {
        HeaderMode::Replace => {
            let mut header = fresh();
            if existing.len() > header.len() {
                header.resize(existing.len(), String::new());
            }
            header
        }
        HeaderMode::Union if existing.is_empty() => fresh(),
        HeaderMode::Union => {
            let mut header = existing.to_vec();
            for field in fields {
                if !header.contains(field) {
                    header.push(field.clone());
                }
            }
            header
        }
    }
}
