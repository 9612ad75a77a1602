//! Spreadsheet API contract and the per-(user, group) spreadsheet provisioner.
//!
//! [`SheetsApi`] is the only surface the core uses to talk to the backing
//! spreadsheet service. Every call carries the caller's decrypted access
//! token; [`AuthorizedSheets`] pairs the two so callers cannot mix them up.

mod client;
mod provisioner;

pub use client::GoogleSheetsClient;
pub use provisioner::{ProvisionError, SpreadsheetProvisioner, INFO_TAB, SUBMITTED_AT_HEADER};

use crate::credentials::PlainToken;
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

/// One tab (sheet) inside a spreadsheet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SheetTab {
    pub sheet_id: i64,
    pub title: String,
}

/// A freshly created spreadsheet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedSpreadsheet {
    pub spreadsheet_id: String,
    pub spreadsheet_url: String,
    pub tabs: Vec<SheetTab>,
}

/// How a form tab's header row changes when the field set changes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderMode {
    /// Keep existing columns where they are and append new fields at the end.
    #[default]
    Union,
    /// Rewrite the header with the latest submission's fields.
    Replace,
}

/// Spreadsheet service operations used by the relay.
#[async_trait]
pub trait SheetsApi: Send + Sync {
    /// Create a spreadsheet containing the named tabs, in order.
    async fn create_spreadsheet(
        &self,
        token: &PlainToken,
        title: &str,
        tab_titles: &[String],
    ) -> Result<CreatedSpreadsheet>;

    async fn list_tabs(&self, token: &PlainToken, spreadsheet_id: &str) -> Result<Vec<SheetTab>>;

    async fn add_tab(&self, token: &PlainToken, spreadsheet_id: &str, title: &str)
        -> Result<SheetTab>;

    /// Values of an A1 range; trailing empty cells may be omitted.
    async fn read_range(
        &self,
        token: &PlainToken,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<Vec<Vec<String>>>;

    async fn update_range(
        &self,
        token: &PlainToken,
        spreadsheet_id: &str,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> Result<()>;

    /// Append rows after the last row of the table at `range`. Returns the
    /// A1 range actually written, e.g. `'Contact'!A5:C5`.
    async fn append_range(
        &self,
        token: &PlainToken,
        spreadsheet_id: &str,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> Result<String>;

    /// Bold, shaded, frozen first row spanning `column_count` columns.
    async fn format_header(
        &self,
        token: &PlainToken,
        spreadsheet_id: &str,
        sheet_id: i64,
        column_count: usize,
    ) -> Result<()>;
}

/// A spreadsheet client bound to one user's valid access token.
#[derive(Clone)]
pub struct AuthorizedSheets {
    token: PlainToken,
    api: Arc<dyn SheetsApi>,
}

impl std::fmt::Debug for AuthorizedSheets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizedSheets")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

impl AuthorizedSheets {
    pub fn new(token: PlainToken, api: Arc<dyn SheetsApi>) -> Self {
        Self { token, api }
    }

    pub fn access_token(&self) -> &PlainToken {
        &self.token
    }

    pub async fn create_spreadsheet(
        &self,
        title: &str,
        tab_titles: &[String],
    ) -> Result<CreatedSpreadsheet> {
        self.api
            .create_spreadsheet(&self.token, title, tab_titles)
            .await
    }

    pub async fn list_tabs(&self, spreadsheet_id: &str) -> Result<Vec<SheetTab>> {
        self.api.list_tabs(&self.token, spreadsheet_id).await
    }

    pub async fn add_tab(&self, spreadsheet_id: &str, title: &str) -> Result<SheetTab> {
        self.api.add_tab(&self.token, spreadsheet_id, title).await
    }

    pub async fn read_range(&self, spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<String>>> {
        self.api.read_range(&self.token, spreadsheet_id, range).await
    }

    pub async fn update_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> Result<()> {
        self.api
            .update_range(&self.token, spreadsheet_id, range, values)
            .await
    }

    pub async fn append_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> Result<String> {
        self.api
            .append_range(&self.token, spreadsheet_id, range, values)
            .await
    }

    pub async fn format_header(
        &self,
        spreadsheet_id: &str,
        sheet_id: i64,
        column_count: usize,
    ) -> Result<()> {
        self.api
            .format_header(&self.token, spreadsheet_id, sheet_id, column_count)
            .await
    }
}

/// Quote a tab title for use in an A1 range (`'It''s'`).
pub fn quote_tab(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

/// A1 range covering a tab's first row.
pub fn header_range(title: &str) -> String {
    format!("{}!1:1", quote_tab(title))
}

/// Recover the first row number from an A1 range such as `'Tab'!A5:D5`,
/// `Sheet1!A12` or `A3:B3`.
pub fn parse_row_number(range: &str) -> Option<i64> {
    // Tab names may contain '!', so split on the last one.
    let cells = range.rsplit_once('!').map_or(range, |(_, cells)| cells);
    let first = cells.split(':').next()?;
    let digits: String = first
        .trim_start_matches(|c: char| c.is_ascii_alphabetic() || c == '$')
        .chars()
        .filter(|c| *c != '$')
        .collect();
    match digits.parse::<i64>() {
        Ok(row) if row > 0 => Some(row),
        _ => None,
    }
}

/// Convert a 1-based column count to its A1 letter (1 -> A, 27 -> AA).
pub fn column_letter(mut column: usize) -> String {
    let mut letters = Vec::new();
    while column > 0 {
        let rem = (column - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        column = (column - 1) / 26;
    }
    letters.iter().rev().collect()
}
