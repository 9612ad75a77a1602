//! Google Sheets v4 REST client.

use super::{CreatedSpreadsheet, SheetTab, SheetsApi};
use crate::credentials::PlainToken;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
}

#[derive(Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

impl From<SheetEntry> for SheetTab {
    fn from(entry: SheetEntry) -> Self {
        SheetTab {
            sheet_id: entry.properties.sheet_id,
            title: entry.properties.title,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpreadsheetResponse {
    spreadsheet_id: String,
    #[serde(default)]
    spreadsheet_url: Option<String>,
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Deserialize)]
struct ValueRangeResponse {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    updated_range: String,
}

#[derive(Deserialize)]
struct AppendResponse {
    updates: AppendUpdates,
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Sheets client over reqwest, every call bounded by the configured timeout.
pub struct GoogleSheetsClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl GoogleSheetsClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Sheets HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn spreadsheet_url(&self, spreadsheet_id: &str) -> String {
        format!(
            "{}/v4/spreadsheets/{}",
            self.base_url,
            urlencoding::encode(spreadsheet_id)
        )
    }

    fn values_url(&self, spreadsheet_id: &str, range: &str) -> String {
        format!(
            "{}/values/{}",
            self.spreadsheet_url(spreadsheet_id),
            urlencoding::encode(range)
        )
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        token: &PlainToken,
        what: &str,
    ) -> Result<T> {
        let response = request
            .bearer_auth(token.expose())
            .header("Accept", "application/json")
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

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", what))
    }

    async fn batch_update(
        &self,
        token: &PlainToken,
        spreadsheet_id: &str,
        requests: Value,
        what: &str,
    ) -> Result<Value> {
        let url = format!("{}:batchUpdate", self.spreadsheet_url(spreadsheet_id));
        self.send_json(
            self.http_client
                .post(url)
                .json(&json!({ "requests": requests })),
            token,
            what,
        )
        .await
    }
}

#[async_trait]
impl SheetsApi for GoogleSheetsClient {
    async fn create_spreadsheet(
        &self,
        token: &PlainToken,
        title: &str,
        tab_titles: &[String],
    ) -> Result<CreatedSpreadsheet> {
        let sheets: Vec<Value> = tab_titles
            .iter()
            .map(|t| json!({ "properties": { "title": t } }))
            .collect();
        let body = json!({
            "properties": { "title": title },
            "sheets": sheets,
        });

        let url = format!("{}/v4/spreadsheets", self.base_url);
        let created: SpreadsheetResponse = self
            .send_json(
                self.http_client.post(url).json(&body),
                token,
                "Create spreadsheet",
            )
            .await?;

        let spreadsheet_url = created.spreadsheet_url.unwrap_or_else(|| {
            format!(
                "https://docs.google.com/spreadsheets/d/{}/edit",
                created.spreadsheet_id
            )
        });

        tracing::debug!(spreadsheet_id = %created.spreadsheet_id, "Spreadsheet created");

        Ok(CreatedSpreadsheet {
            spreadsheet_id: created.spreadsheet_id,
            spreadsheet_url,
            tabs: created.sheets.into_iter().map(SheetTab::from).collect(),
        })
    }

    async fn list_tabs(&self, token: &PlainToken, spreadsheet_id: &str) -> Result<Vec<SheetTab>> {
        let request = self
            .http_client
            .get(self.spreadsheet_url(spreadsheet_id))
            .query(&[("fields", "spreadsheetId,sheets.properties(sheetId,title)")]);
        let metadata: SpreadsheetResponse = self
            .send_json(request, token, "Get spreadsheet metadata")
            .await?;
        Ok(metadata.sheets.into_iter().map(SheetTab::from).collect())
    }

    async fn add_tab(
        &self,
        token: &PlainToken,
        spreadsheet_id: &str,
        title: &str,
    ) -> Result<SheetTab> {
        let reply = self
            .batch_update(
                token,
                spreadsheet_id,
                json!([{ "addSheet": { "properties": { "title": title } } }]),
                "Add tab",
            )
            .await?;

        let properties = reply
            .pointer("/replies/0/addSheet/properties")
            .cloned()
            .ok_or_else(|| anyhow!("Add tab response missing sheet properties"))?;
        let properties: SheetProperties =
            serde_json::from_value(properties).context("Invalid addSheet properties")?;

        Ok(SheetTab {
            sheet_id: properties.sheet_id,
            title: properties.title,
        })
    }

    async fn read_range(
        &self,
        token: &PlainToken,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<Vec<Vec<String>>> {
        let response: ValueRangeResponse = self
            .send_json(
                self.http_client.get(self.values_url(spreadsheet_id, range)),
                token,
                "Read range",
            )
            .await?;
        Ok(response
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    async fn update_range(
        &self,
        token: &PlainToken,
        spreadsheet_id: &str,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> Result<()> {
        let request = self
            .http_client
            .put(self.values_url(spreadsheet_id, range))
            .query(&[("valueInputOption", "RAW")])
            .json(&json!({ "range": range, "majorDimension": "ROWS", "values": values }));
        let _: Value = self.send_json(request, token, "Update range").await?;
        Ok(())
    }

    async fn append_range(
        &self,
        token: &PlainToken,
        spreadsheet_id: &str,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> Result<String> {
        let url = format!("{}:append", self.values_url(spreadsheet_id, range));
        let request = self
            .http_client
            .post(url)
            .query(&[
                ("valueInputOption", "RAW"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&json!({ "majorDimension": "ROWS", "values": values }));
        let response: AppendResponse = self.send_json(request, token, "Append range").await?;
        Ok(response.updates.updated_range)
    }

    async fn format_header(
        &self,
        token: &PlainToken,
        spreadsheet_id: &str,
        sheet_id: i64,
        column_count: usize,
    ) -> Result<()> {
        let requests = json!([
            {
                "repeatCell": {
                    "range": {
                        "sheetId": sheet_id,
                        "startRowIndex": 0,
                        "endRowIndex": 1,
                        "startColumnIndex": 0,
                        "endColumnIndex": column_count,
                    },
                    "cell": {
                        "userEnteredFormat": {
                            "backgroundColor": { "red": 0.85, "green": 0.92, "blue": 0.98 },
                            "textFormat": { "bold": true },
                        }
                    },
                    "fields": "userEnteredFormat(backgroundColor,textFormat)",
                }
            },
            {
                "updateSheetProperties": {
                    "properties": {
                        "sheetId": sheet_id,
                        "gridProperties": { "frozenRowCount": 1 },
                    },
                    "fields": "gridProperties.frozenRowCount",
                }
            }
        ]);
        self.batch_update(token, spreadsheet_id, requests, "Format header")
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn token() -> PlainToken {
        PlainToken::new("ya29.test".to_string())
    }

    fn client(url: &str) -> GoogleSheetsClient {
        GoogleSheetsClient::new(url, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_create_spreadsheet() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v4/spreadsheets")
            .match_header("authorization", "Bearer ya29.test")
            .match_body(Matcher::PartialJson(json!({
                "properties": { "title": "Ada - Intake - 2024-03-07" },
                "sheets": [{ "properties": { "title": "Info" } }],
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "spreadsheetId": "abc123",
                    "spreadsheetUrl": "https://docs.google.com/spreadsheets/d/abc123/edit",
                    "sheets": [{"properties": {"sheetId": 0, "title": "Info"}}]
                }"#,
            )
            .create_async()
            .await;

        let created = client(&server.url())
            .create_spreadsheet(&token(), "Ada - Intake - 2024-03-07", &["Info".to_string()])
            .await
            .unwrap();

        assert_eq!(created.spreadsheet_id, "abc123");
        assert!(created.spreadsheet_url.ends_with("/abc123/edit"));
        assert_eq!(created.tabs, vec![SheetTab { sheet_id: 0, title: "Info".to_string() }]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_tabs() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v4/spreadsheets/abc123")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"spreadsheetId":"abc123","sheets":[
                    {"properties":{"sheetId":0,"title":"Info"}},
                    {"properties":{"sheetId":7,"title":"ContactForm"}}
                ]}"#,
            )
            .create_async()
            .await;

        let tabs = client(&server.url()).list_tabs(&token(), "abc123").await.unwrap();
        assert_eq!(tabs.len(), 2);
        assert_eq!(tabs[1].sheet_id, 7);
        assert_eq!(tabs[1].title, "ContactForm");
    }

    #[tokio::test]
    async fn test_add_tab_reads_reply() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v4/spreadsheets/abc123:batchUpdate")
            .match_body(Matcher::PartialJson(json!({
                "requests": [{ "addSheet": { "properties": { "title": "ContactForm" } } }]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"spreadsheetId":"abc123","replies":[{"addSheet":{"properties":{"sheetId":42,"title":"ContactForm"}}}]}"#,
            )
            .create_async()
            .await;

        let tab = client(&server.url())
            .add_tab(&token(), "abc123", "ContactForm")
            .await
            .unwrap();
        assert_eq!(tab.sheet_id, 42);
    }

    #[tokio::test]
    async fn test_read_range_stringifies_cells() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", Matcher::Regex(r"^/v4/spreadsheets/abc123/values/.+".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"range":"'ContactForm'!A1:C1","values":[["Submitted At", 42, "name"]]}"#)
            .create_async()
            .await;

        let rows = client(&server.url())
            .read_range(&token(), "abc123", "'ContactForm'!1:1")
            .await
            .unwrap();
        assert_eq!(rows, vec![vec!["Submitted At", "42", "name"]]);
    }

    #[tokio::test]
    async fn test_read_empty_range() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", Matcher::Regex(r"^/v4/spreadsheets/abc123/values/.+".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"range":"'ContactForm'!A1:Z1","majorDimension":"ROWS"}"#)
            .create_async()
            .await;

        let rows = client(&server.url())
            .read_range(&token(), "abc123", "'ContactForm'!1:1")
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_append_returns_updated_range() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Regex(r"^/v4/spreadsheets/abc123/values/.+:append$".to_string()))
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("valueInputOption".into(), "RAW".into()),
                Matcher::UrlEncoded("insertDataOption".into(), "INSERT_ROWS".into()),
            ]))
            .match_body(Matcher::PartialJson(json!({ "values": [["2024-03-07 09:05:00", "=HYPERLINK(\"x\")"]] })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"updates":{"updatedRange":"'ContactForm'!A5:B5","updatedRows":1}}"#)
            .create_async()
            .await;

        let range = client(&server.url())
            .append_range(
                &token(),
                "abc123",
                "'ContactForm'!A1",
                vec![vec!["2024-03-07 09:05:00".to_string(), "=HYPERLINK(\"x\")".to_string()]],
            )
            .await
            .unwrap();
        assert_eq!(range, "'ContactForm'!A5:B5");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("PUT", Matcher::Regex(r"^/v4/spreadsheets/abc123/values/.+".to_string()))
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(r#"{"error":{"code":403,"status":"PERMISSION_DENIED"}}"#)
            .create_async()
            .await;

        let err = client(&server.url())
            .update_range(&token(), "abc123", "'ContactForm'!1:1", vec![vec!["a".to_string()]])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("403"));
        assert!(err.to_string().contains("PERMISSION_DENIED"));
    }
}
