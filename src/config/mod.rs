pub mod runtime;
pub use runtime::{new_runtime_config, RuntimeConfig, SharedRuntimeConfig};

use crate::sheets::HeaderMode;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Environment variable pointing at the TOML config file
pub const CONFIG_PATH_ENV: &str = "FORMRELAY_CONFIG";

/// Environment variable holding the base64 token encryption key
pub const ENCRYPTION_KEY_ENV: &str = "FORMRELAY_ENCRYPTION_KEY";

/// Complete relay configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub google: GoogleConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub lockout: LockoutConfig,
    #[serde(default)]
    pub oauth: OAuthStateConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Externally reachable base URL, used to build the OAuth redirect URI
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            public_base_url: default_public_base_url(),
        }
    }
}

/// SQLite database location
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "formrelay.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Google endpoints. Client id/secret come from the environment only.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_sheets_base_url")]
    pub sheets_base_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Upper bound for every OAuth and Sheets HTTP call
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
}

fn default_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_sheets_base_url() -> String {
    "https://sheets.googleapis.com".to_string()
}

fn default_scopes() -> Vec<String> {
    vec![
        "https://www.googleapis.com/auth/spreadsheets".to_string(),
        "https://www.googleapis.com/auth/userinfo.email".to_string(),
    ]
}

fn default_http_timeout() -> u64 {
    15
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            sheets_base_url: default_sheets_base_url(),
            scopes: default_scopes(),
            http_timeout_seconds: default_http_timeout(),
        }
    }
}

/// Submission pipeline behaviour
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestionConfig {
    /// How a tab's header row evolves when the field set changes
    #[serde(default)]
    pub header_mode: HeaderMode,
    /// Re-check form entitlement on every webhook call
    #[serde(default)]
    pub enforce_entitlement: bool,
}

/// Failed-login lockout
#[derive(Debug, Clone, Deserialize)]
pub struct LockoutConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_lockout_window")]
    pub window_seconds: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_lockout_window() -> u64 {
    900
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            window_seconds: default_lockout_window(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

/// OAuth CSRF state lifetime
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthStateConfig {
    #[serde(default = "default_state_expiry")]
    pub state_expiry_seconds: i64,
}

fn default_state_expiry() -> i64 {
    600
}

impl Default for OAuthStateConfig {
    fn default() -> Self {
        Self {
            state_expiry_seconds: default_state_expiry(),
        }
    }
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RelayConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("Invalid config file {}", path.display()))
}

/// Load the file if it exists, otherwise fall back to defaults.
pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<RelayConfig> {
    if path.as_ref().exists() {
        load_config(path)
    } else {
        Ok(RelayConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.server.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.database.path, "formrelay.db");
        assert_eq!(config.google.token_url, "https://oauth2.googleapis.com/token");
        assert_eq!(config.google.http_timeout_seconds, 15);
        assert_eq!(config.ingestion.header_mode, HeaderMode::Union);
        assert!(!config.ingestion.enforce_entitlement);
        assert_eq!(config.lockout.max_attempts, 5);
        assert_eq!(config.oauth.state_expiry_seconds, 600);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [server]
            bind_addr = "127.0.0.1:8080"
            public_base_url = "https://relay.example.com"

            [database]
            path = "/var/lib/formrelay/relay.db"

            [google]
            sheets_base_url = "http://localhost:9999"
            http_timeout_seconds = 5

            [ingestion]
            header_mode = "replace"
            enforce_entitlement = true

            [lockout]
            max_attempts = 3
            window_seconds = 60
        "#;

        let config: RelayConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.public_base_url, "https://relay.example.com");
        assert_eq!(config.database.path, "/var/lib/formrelay/relay.db");
        assert_eq!(config.google.sheets_base_url, "http://localhost:9999");
        assert_eq!(config.google.http_timeout_seconds, 5);
        assert_eq!(config.ingestion.header_mode, HeaderMode::Replace);
        assert!(config.ingestion.enforce_entitlement);
        assert_eq!(config.lockout.max_attempts, 3);
        assert_eq!(config.lockout.sweep_interval_seconds, 60); // Default
    }

    #[test]
    fn test_partial_config() {
        let toml = r#"
            [google]
            http_timeout_seconds = 30
        "#;

        let config: RelayConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.google.http_timeout_seconds, 30);
        assert_eq!(config.google.auth_url, "https://accounts.google.com/o/oauth2/v2/auth");
        assert_eq!(config.server.bind_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_load_from_file_and_missing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[database]\npath = \"relay-test.db\"").unwrap();

        let config = load_or_default(file.path()).unwrap();
        assert_eq!(config.database.path, "relay-test.db");

        let config = load_or_default("/nonexistent/formrelay.toml").unwrap();
        assert_eq!(config.database.path, "formrelay.db");
    }

    #[test]
    fn test_invalid_header_mode_rejected() {
        let toml = r#"
            [ingestion]
            header_mode = "merge-ish"
        "#;
        assert!(toml::from_str::<RelayConfig>(toml).is_err());
    }
}
