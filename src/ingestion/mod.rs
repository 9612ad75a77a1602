//! Webhook submission ingestion.
//!
//! A single pass per webhook call, short-circuiting at the first failing
//! stage:
//!
//! 1. token check      - the user has a usable Google credential
//! 2. payload parse    - the answer container is present
//! 3. form lookup      - form and group exist (plus entitlement, if enforced)
//! 4. binding ensure   - the group spreadsheet exists
//! 5. normalize        - payload to sorted columns
//! 6. tab ensure       - form tab and header row
//! 7. append           - one row written
//!
//! Every attempt, successful or not, ends with one audit record. Audit
//! failures are logged and never change the outcome.

mod normalize;
mod records;

pub use normalize::{
    header_fields, strip_question_prefix, PayloadError, SubmissionPayload, CONTAINER_KEY,
};
pub use records::{
    NewSubmission, SqliteSubmissionStore, SubmissionLog, SubmissionRecord, SubmissionStatus,
};

use crate::catalog::{CatalogRepository, EntitlementResolver};
use crate::sheets::{ProvisionError, SpreadsheetProvisioner};
use crate::tokens::{CredentialError, TokenLifecycleManager};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Stage failures. The display text is what callers and the audit log see.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("invalid Google connection")]
    InvalidConnection(#[source] CredentialError),
    #[error("invalid payload")]
    InvalidPayload(#[source] PayloadError),
    #[error("form {0} not found")]
    FormNotFound(i64),
    #[error("group {0} not found")]
    GroupNotFound(i64),
    #[error("access denied")]
    AccessDenied,
    #[error("failed to create spreadsheet")]
    SpreadsheetCreation(#[source] ProvisionError),
    #[error("failed to prepare form tab")]
    TabSetup(#[source] ProvisionError),
    #[error("failed to write to spreadsheet")]
    WriteFailed(#[source] ProvisionError),
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl IngestionError {
    /// Unclassified failures, reported as HTTP 500.
    pub fn is_unexpected(&self) -> bool {
        matches!(self, IngestionError::Internal(_))
    }

    fn from_credential(err: CredentialError) -> Self {
        match err {
            CredentialError::Store(e) => IngestionError::Internal(e),
            other => IngestionError::InvalidConnection(other),
        }
    }

    fn from_provision(err: ProvisionError, stage: fn(ProvisionError) -> Self) -> Self {
        match err {
            ProvisionError::Store(e) => IngestionError::Internal(e),
            other => stage(other),
        }
    }
}

/// Display text plus every source, `a: b: c`.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

/// Result of one webhook call.
#[derive(Debug)]
pub struct WebhookOutcome {
    pub submission_id: Option<String>,
    pub result: Result<i64, IngestionError>,
}

impl WebhookOutcome {
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn row_number(&self) -> Option<i64> {
        self.result.as_ref().ok().copied()
    }

    pub fn error(&self) -> Option<&IngestionError> {
        self.result.as_ref().err()
    }

    pub fn error_message(&self) -> Option<String> {
        self.error().map(|e| e.to_string())
    }
}

pub struct IngestionPipeline {
    catalog: Arc<dyn CatalogRepository>,
    entitlements: EntitlementResolver,
    tokens: Arc<TokenLifecycleManager>,
    provisioner: Arc<SpreadsheetProvisioner>,
    log: Arc<dyn SubmissionLog>,
    enforce_entitlement: bool,
}

impl IngestionPipeline {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        tokens: Arc<TokenLifecycleManager>,
        provisioner: Arc<SpreadsheetProvisioner>,
        log: Arc<dyn SubmissionLog>,
        enforce_entitlement: bool,
    ) -> Self {
        Self {
            entitlements: EntitlementResolver::new(Arc::clone(&catalog)),
            catalog,
            tokens,
            provisioner,
            log,
            enforce_entitlement,
        }
    }

    pub async fn process_webhook(
        &self,
        raw: &[u8],
        user_id: i64,
        form_id: i64,
        group_id: i64,
    ) -> WebhookOutcome {
        let received_at = Utc::now();
        // Parsed up front so the audit record carries the submission id even
        // when an earlier stage fails.
        let payload = SubmissionPayload::parse(raw);
        let submission_id = payload.as_ref().ok().and_then(|p| p.submission_id());

        let result = self.run(payload, user_id, form_id, group_id).await;

        match &result {
            Ok(row) => info!(
                user_id,
                form_id,
                group_id,
                row,
                submission_id = ?submission_id,
                "Submission written"
            ),
            Err(e) => warn!(
                user_id,
                form_id,
                group_id,
                submission_id = ?submission_id,
                error = %error_chain(e),
                "Submission failed"
            ),
        }

        let record = NewSubmission {
            user_id,
            form_id,
            group_id,
            external_submission_id: submission_id.clone(),
            row_number: result.as_ref().ok().copied(),
            submitted_at: received_at,
            status: if result.is_ok() {
                SubmissionStatus::Success
            } else {
                SubmissionStatus::Failed
            },
            error_message: result.as_ref().err().map(|e| e.to_string()),
        };
        if let Err(e) = self.log.record(&record) {
            error!(user_id, form_id, group_id, error = %format!("{:#}", e), "Failed to write submission audit record");
        }

        WebhookOutcome {
            submission_id,
            result,
        }
    }

    async fn run(
        &self,
        payload: Result<SubmissionPayload, PayloadError>,
        user_id: i64,
        form_id: i64,
        group_id: i64,
    ) -> Result<i64, IngestionError> {
        self.tokens
            .authorized_client(user_id)
            .await
            .map_err(IngestionError::from_credential)?;

        let payload = payload.map_err(IngestionError::InvalidPayload)?;

        let form = self
            .catalog
            .get_form(form_id)
            .map_err(IngestionError::Internal)?
            .ok_or(IngestionError::FormNotFound(form_id))?;
        let group = self
            .catalog
            .get_group(group_id)
            .map_err(IngestionError::Internal)?
            .ok_or(IngestionError::GroupNotFound(group_id))?;

        if self.enforce_entitlement {
            let decision = self
                .entitlements
                .resolve_access(user_id, form_id, group_id)
                .map_err(IngestionError::Internal)?;
            if !decision.has_access {
                return Err(IngestionError::AccessDenied);
            }
        }

        self.provisioner
            .ensure_group_spreadsheet(user_id, group_id, &group.name)
            .await
            .map_err(|e| IngestionError::from_provision(e, IngestionError::SpreadsheetCreation))?;

        let fields = payload.normalize();
        let headers = header_fields(&fields);
        let tab = form.tab_label();
        debug!(user_id, form_id, tab, columns = headers.len(), "Normalized submission");

        self.provisioner
            .ensure_form_tab(user_id, group_id, tab, &headers)
            .await
            .map_err(|e| IngestionError::from_provision(e, IngestionError::TabSetup))?;

        self.provisioner
            .append_row(user_id, group_id, tab, &fields)
            .await
            .map_err(|e| IngestionError::from_provision(e, IngestionError::WriteFailed))
    }
}
