//! CSRF state for the Google connect flow.
//!
//! Each connect attempt gets a single-use random token bound to the user who
//! started it. The callback trades the token back for that user id.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Who started a pending connect attempt, and when.
#[derive(Clone, Debug)]
pub struct StateEntry {
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

impl StateEntry {
    fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.created_at > ttl
    }
}

#[derive(Clone)]
pub struct StateManager {
    pending: Arc<DashMap<String, StateEntry>>,
    ttl: Duration,
}

impl StateManager {
    /// `ttl_seconds` bounds how long a user may sit on the consent screen.
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    pub fn create_state(&self, user_id: i64) -> String {
        let token = Uuid::new_v4().to_string();
        self.pending.insert(
            token.clone(),
            StateEntry {
                user_id,
                created_at: Utc::now(),
            },
        );
        token
    }

    /// Redeem a token. It is removed whether or not it was still fresh.
    pub fn validate_and_consume(&self, token: &str) -> Option<StateEntry> {
        let (_, entry) = self.pending.remove(token)?;
        (!entry.is_stale(Utc::now(), self.ttl)).then_some(entry)
    }

    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        self.pending.retain(|_, entry| !entry.is_stale(now, self.ttl));
    }

    pub fn count(&self) -> usize {
        self.pending.len()
    }
}

/// Sweeps abandoned connect attempts every `interval_seconds`.
pub async fn run_state_cleanup(manager: StateManager, interval_seconds: u64) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_seconds.max(1)));

    loop {
        ticker.tick().await;
        let before = manager.count();
        manager.cleanup_expired();
        let removed = before.saturating_sub(manager.count());
        if removed > 0 {
            tracing::debug!(removed, pending = manager.count(), "Expired OAuth states swept");
        }
    }
}
