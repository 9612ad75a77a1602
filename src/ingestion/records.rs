//! Append-only audit trail of webhook ingestion attempts.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SubmissionStatus {
    Success,
    Failed,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Success => "Success",
            SubmissionStatus::Failed => "Failed",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "Success" => Ok(SubmissionStatus::Success),
            "Failed" => Ok(SubmissionStatus::Failed),
            other => Err(anyhow!("Unknown submission status '{}'", other)),
        }
    }
}

/// One ingestion attempt, as it will be written.
#[derive(Clone, Debug)]
pub struct NewSubmission {
    pub user_id: i64,
    pub form_id: i64,
    pub group_id: i64,
    pub external_submission_id: Option<String>,
    pub row_number: Option<i64>,
    pub submitted_at: DateTime<Utc>,
    pub status: SubmissionStatus,
    pub error_message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    pub id: i64,
    pub user_id: i64,
    pub form_id: i64,
    pub group_id: i64,
    pub external_submission_id: Option<String>,
    pub row_number: Option<i64>,
    pub submitted_at: DateTime<Utc>,
    pub status: SubmissionStatus,
    pub error_message: Option<String>,
}

pub trait SubmissionLog: Send + Sync {
    fn record(&self, submission: &NewSubmission) -> Result<SubmissionRecord>;

    /// Most recent first.
    fn list_for_user(&self, user_id: i64, limit: usize) -> Result<Vec<SubmissionRecord>>;
}

/// SQLite submission log. Rows are never updated or deleted.
pub struct SqliteSubmissionStore {
    conn: Mutex<Connection>,
}

impl SqliteSubmissionStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open submission database")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS submission_records (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                form_id INTEGER NOT NULL,
                group_id INTEGER NOT NULL,
                external_submission_id TEXT,
                destination_row INTEGER,
                submitted_at TEXT NOT NULL,
                status TEXT NOT NULL,
                error_message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_submission_records_user
                ON submission_records(user_id, submitted_at);
            "#,
        )
        .context("Failed to create submission_records table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Submission store connection mutex poisoned"))
    }
}

type RecordRow = (
    i64,
    i64,
    i64,
    i64,
    Option<String>,
    Option<i64>,
    String,
    String,
    Option<String>,
);

impl SubmissionLog for SqliteSubmissionStore {
    fn record(&self, submission: &NewSubmission) -> Result<SubmissionRecord> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO submission_records
                (user_id, form_id, group_id, external_submission_id, destination_row,
                 submitted_at, status, error_message)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                submission.user_id,
                submission.form_id,
                submission.group_id,
                submission.external_submission_id,
                submission.row_number,
                submission.submitted_at.to_rfc3339(),
                submission.status.as_str(),
                submission.error_message,
            ],
        )
        .context("Failed to insert submission record")?;

        Ok(SubmissionRecord {
            id: conn.last_insert_rowid(),
            user_id: submission.user_id,
            form_id: submission.form_id,
            group_id: submission.group_id,
            external_submission_id: submission.external_submission_id.clone(),
            row_number: submission.row_number,
            submitted_at: submission.submitted_at,
            status: submission.status,
            error_message: submission.error_message.clone(),
        })
    }

    fn list_for_user(&self, user_id: i64, limit: usize) -> Result<Vec<SubmissionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, user_id, form_id, group_id, external_submission_id, destination_row,
                       submitted_at, status, error_message
                FROM submission_records
                WHERE user_id = ?1
                ORDER BY submitted_at DESC, id DESC
                LIMIT ?2
                "#,
            )
            .context("Failed to prepare submission query")?;

        let rows = stmt
            .query_map(params![user_id, limit as i64], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                ))
            })
            .context("Failed to query submission records")?
            .collect::<rusqlite::Result<Vec<RecordRow>>>()
            .context("Failed to read submission records")?;

        rows.into_iter()
            .map(
                |(id, user_id, form_id, group_id, external_submission_id, row_number, at, status, error_message)|
                 -> Result<SubmissionRecord> {
                    Ok(SubmissionRecord {
                        id,
                        user_id,
                        form_id,
                        group_id,
                        external_submission_id,
                        row_number,
                        submitted_at: DateTime::parse_from_rfc3339(&at)
                            .map(|dt| dt.with_timezone(&Utc))
                            .with_context(|| format!("Failed to parse timestamp '{}'", at))?,
                        status: SubmissionStatus::parse(&status)?,
                        error_message,
                    })
                },
            )
            .collect()
    }
}
