use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Overrides the webhook body limit at startup
pub const BODY_LIMIT_ENV: &str = "FORMRELAY_WEBHOOK_BODY_LIMIT_BYTES";

const DEFAULT_WEBHOOK_BODY_LIMIT: usize = 1024 * 1024;

/// Limits read per request, so they can be tuned without a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub webhook_body_limit_bytes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            webhook_body_limit_bytes: DEFAULT_WEBHOOK_BODY_LIMIT,
        }
    }
}

impl RuntimeConfig {
    /// Defaults with environment overrides applied. Unparseable values are
    /// ignored.
    pub fn from_env() -> Self {
        Self::with_override(std::env::var(BODY_LIMIT_ENV).ok().as_deref())
    }

    fn with_override(body_limit: Option<&str>) -> Self {
        let mut cfg = Self::default();
        if let Some(limit) = body_limit.and_then(|v| v.trim().parse::<usize>().ok()) {
            cfg.webhook_body_limit_bytes = limit;
        }
        cfg
    }
}

pub type SharedRuntimeConfig = Arc<RwLock<RuntimeConfig>>;

pub fn new_runtime_config() -> SharedRuntimeConfig {
    Arc::new(RwLock::new(RuntimeConfig::from_env()))
}
