// Shared fixtures for the router-level integration tests.
//
// Google is replaced by in-memory fakes; the SQLite stores are real and live
// in one temporary database file.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{Duration as ChronoDuration, Utc};
use formrelay::api::{create_app, ApiServices};
use formrelay::catalog::{FormGroupMapping, SqliteCatalogStore};
use formrelay::config::{RuntimeConfig, SharedRuntimeConfig};
use formrelay::credentials::{EncryptionService, PlainToken};
use formrelay::ingestion::{IngestionPipeline, SqliteSubmissionStore};
use formrelay::lockout::LoginAttemptTracker;
use formrelay::oauth::{OAuthProvider, StateManager, TokenGrant};
use formrelay::sheets::{
    column_letter, quote_tab, CreatedSpreadsheet, HeaderMode, SheetTab, SheetsApi,
    SpreadsheetProvisioner,
};
use formrelay::tokens::TokenLifecycleManager;
use formrelay::users::{CredentialUpdate, SqliteUserStore, User, UserRepository};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

pub const API_TOKEN: &str = "api-grace-51d0";

/// In-memory spreadsheet service: tab rows keyed by (spreadsheet, tab).
#[derive(Default)]
pub struct MemorySheets {
    tabs: Mutex<HashMap<(String, String), Vec<Vec<String>>>>,
    order: Mutex<HashMap<String, Vec<String>>>,
    pub spreadsheets: AtomicUsize,
}

fn tab_of(range: &str) -> String {
    let tab = range.rsplit_once('!').map_or(range, |(tab, _)| tab);
    tab.trim_matches('\'').replace("''", "'")
}

impl MemorySheets {
    pub fn rows(&self, spreadsheet_id: &str, tab: &str) -> Vec<Vec<String>> {
        self.tabs
            .lock()
            .unwrap()
            .get(&(spreadsheet_id.to_string(), tab.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn tab_names(&self, spreadsheet_id: &str) -> Vec<String> {
        self.order
            .lock()
            .unwrap()
            .get(spreadsheet_id)
            .cloned()
            .unwrap_or_default()
    }

    fn with_tab<T>(
        &self,
        spreadsheet_id: &str,
        range: &str,
        f: impl FnOnce(&mut Vec<Vec<String>>) -> T,
    ) -> Result<T> {
        let mut tabs = self.tabs.lock().unwrap();
        let rows = tabs
            .get_mut(&(spreadsheet_id.to_string(), tab_of(range)))
            .ok_or_else(|| anyhow!("Unable to parse range: {}", range))?;
        Ok(f(rows))
    }
}

#[async_trait]
impl SheetsApi for MemorySheets {
    async fn create_spreadsheet(
        &self,
        _token: &PlainToken,
        _title: &str,
        tab_titles: &[String],
    ) -> Result<CreatedSpreadsheet> {
        let n = self.spreadsheets.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("book-{}", n);
        {
            let mut tabs = self.tabs.lock().unwrap();
            for title in tab_titles {
                tabs.insert((id.clone(), title.clone()), Vec::new());
            }
        }
        self.order.lock().unwrap().insert(id.clone(), tab_titles.to_vec());
        Ok(CreatedSpreadsheet {
            spreadsheet_url: format!("https://docs.test/spreadsheets/d/{}", id),
            tabs: tab_titles
                .iter()
                .enumerate()
                .map(|(i, t)| SheetTab {
                    sheet_id: i as i64,
                    title: t.clone(),
                })
                .collect(),
            spreadsheet_id: id,
        })
    }

    async fn list_tabs(&self, _token: &PlainToken, spreadsheet_id: &str) -> Result<Vec<SheetTab>> {
        Ok(self
            .tab_names(spreadsheet_id)
            .into_iter()
            .enumerate()
            .map(|(i, title)| SheetTab {
                sheet_id: i as i64,
                title,
            })
            .collect())
    }

    async fn add_tab(&self, _token: &PlainToken, spreadsheet_id: &str, title: &str) -> Result<SheetTab> {
        let mut order = self.order.lock().unwrap();
        let names = order
            .get_mut(spreadsheet_id)
            .ok_or_else(|| anyhow!("spreadsheet not found"))?;
        names.push(title.to_string());
        self.tabs
            .lock()
            .unwrap()
            .insert((spreadsheet_id.to_string(), title.to_string()), Vec::new());
        Ok(SheetTab {
            sheet_id: names.len() as i64 - 1,
            title: title.to_string(),
        })
    }

    async fn read_range(
        &self,
        _token: &PlainToken,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<Vec<Vec<String>>> {
        self.with_tab(spreadsheet_id, range, |rows| {
            rows.first().cloned().into_iter().collect()
        })
    }

    async fn update_range(
        &self,
        _token: &PlainToken,
        spreadsheet_id: &str,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> Result<()> {
        self.with_tab(spreadsheet_id, range, |rows| {
            for (i, row) in values.into_iter().enumerate() {
                match rows.get_mut(i) {
                    Some(existing) => *existing = row,
                    None => rows.push(row),
                }
            }
        })
    }

    async fn append_range(
        &self,
        _token: &PlainToken,
        spreadsheet_id: &str,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> Result<String> {
        let width = values.first().map_or(1, |r| r.len().max(1));
        let row = self.with_tab(spreadsheet_id, range, |rows| {
            rows.extend(values);
            rows.len()
        })?;
        Ok(format!(
            "{}!A{}:{}{}",
            quote_tab(&tab_of(range)),
            row,
            column_letter(width),
            row
        ))
    }

    async fn format_header(
        &self,
        _token: &PlainToken,
        _spreadsheet_id: &str,
        _sheet_id: i64,
        _column_count: usize,
    ) -> Result<()> {
        Ok(())
    }
}

/// OAuth provider issuing predictable tokens.
#[derive(Default)]
pub struct StaticOAuth {
    pub refreshes: AtomicUsize,
}

#[async_trait]
impl OAuthProvider for StaticOAuth {
    fn authorization_url(&self, state: &str, redirect_uri: &str) -> String {
        format!(
            "https://consent.test/auth?state={}&redirect_uri={}",
            state,
            urlencoding::encode(redirect_uri)
        )
    }

    async fn exchange_code(&self, code: &str, _redirect_uri: &str) -> Result<TokenGrant> {
        Ok(TokenGrant {
            access_token: PlainToken::new(format!("access-{}", code)),
            refresh_token: Some(PlainToken::new(format!("refresh-{}", code))),
            expires_in: Some(3599),
        })
    }

    async fn refresh(&self, _refresh_token: &PlainToken) -> Result<TokenGrant> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(TokenGrant {
            access_token: PlainToken::new("refreshed".to_string()),
            refresh_token: None,
            expires_in: Some(3599),
        })
    }
}

pub struct TestRelay {
    pub router: Router,
    pub users: Arc<SqliteUserStore>,
    pub catalog: Arc<SqliteCatalogStore>,
    pub sheets: Arc<MemorySheets>,
    pub oauth: Arc<StaticOAuth>,
    pub runtime_config: SharedRuntimeConfig,
    pub encryption: EncryptionService,
    pub user: User,
    pub form_id: i64,
    pub group_id: i64,
    pub db_dir: TempDir,
}

pub fn encryption() -> EncryptionService {
    EncryptionService::from_key_bytes(&[42u8; 32]).unwrap()
}

impl TestRelay {
    /// One user, one group "Intake" with a free form "Contact Form" whose
    /// tab is "ContactForm".
    pub fn new() -> Self {
        Self::with_header_mode(HeaderMode::Union)
    }

    pub fn with_header_mode(header_mode: HeaderMode) -> Self {
        let db_dir = tempfile::tempdir().unwrap();
        let db_path = db_dir.path().join("relay.db");

        let users = Arc::new(SqliteUserStore::new(&db_path).unwrap());
        let catalog = Arc::new(SqliteCatalogStore::new(&db_path).unwrap());
        let submissions = Arc::new(SqliteSubmissionStore::new(&db_path).unwrap());

        let user = users
            .create_user("grace@example.com", "Grace", API_TOKEN)
            .unwrap();
        let group = catalog.create_group("Intake", 1).unwrap();
        let form = catalog
            .create_form("9001", "Contact Form", Some("ContactForm"))
            .unwrap();
        catalog
            .map_form(&FormGroupMapping {
                form_id: form.id,
                group_id: group.id,
                is_free_in_group: true,
                requires_package: false,
                sort_order: 0,
            })
            .unwrap();

        let sheets = Arc::new(MemorySheets::default());
        let oauth = Arc::new(StaticOAuth::default());
        let tokens = Arc::new(TokenLifecycleManager::new(
            users.clone(),
            encryption(),
            oauth.clone(),
            sheets.clone(),
        ));
        let provisioner = Arc::new(SpreadsheetProvisioner::new(
            users.clone(),
            Arc::clone(&tokens),
            header_mode,
        ));
        let pipeline = Arc::new(IngestionPipeline::new(
            catalog.clone(),
            Arc::clone(&tokens),
            Arc::clone(&provisioner),
            submissions.clone(),
            false,
        ));
        let runtime_config = Arc::new(RwLock::new(RuntimeConfig::default()));

        let router = create_app(ApiServices {
            users: users.clone(),
            catalog: catalog.clone(),
            submissions,
            tokens,
            provisioner,
            pipeline,
            state_manager: StateManager::new(600),
            lockout: Arc::new(LoginAttemptTracker::new(5, Duration::from_secs(900))),
            runtime_config: runtime_config.clone(),
            public_base_url: "https://relay.example.com".to_string(),
        });

        Self {
            router,
            users,
            catalog,
            sheets,
            oauth,
            runtime_config,
            encryption: encryption(),
            user,
            form_id: form.id,
            group_id: group.id,
            db_dir,
        }
    }

    /// Store Google tokens for the user; `with_refresh = false` leaves the
    /// user disconnected.
    pub fn seed_google(&self, expires_in_secs: i64, with_refresh: bool) {
        self.users
            .update_credential(
                self.user.id,
                &CredentialUpdate {
                    access_token: self.encryption.encrypt("seeded-access").unwrap(),
                    refresh_token: with_refresh
                        .then(|| self.encryption.encrypt("seeded-refresh").unwrap()),
                    expires_at: Utc::now() + ChronoDuration::seconds(expires_in_secs),
                },
            )
            .unwrap();
    }

    pub fn webhook_uri(&self) -> String {
        format!(
            "/api/webhook/jotform/{}/{}/{}",
            self.user.id, self.form_id, self.group_id
        )
    }

    pub async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    pub async fn post_webhook(&self, body: impl Into<Body>) -> (StatusCode, Value) {
        let request = Request::post(self.webhook_uri())
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap();
        self.call(request).await
    }

    pub async fn get_authorized(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::get(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", API_TOKEN))
            .body(Body::empty())
            .unwrap();
        self.call(request).await
    }
}
