//! Submission journal: an append-only audit trail of every submission outcome.
//!
//! Journal writes are best-effort. The orchestrator logs and swallows journal
//! failures so an audit outage never changes the result handed to the caller.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::AnyPool;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct JournalEntry {
    pub submission_id: Uuid,
    pub trace_id: String,
    pub reference: String,
    pub vendor: String,
    pub waybill: Option<String>,
    pub booking_reference: Option<String>,
    /// `SUCCESS` or a `SubmitError::kind()` code.
    pub outcome: String,
    pub message: String,
    pub attempts: u32,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait SubmissionJournal: Send + Sync {
    async fn record(&self, entry: &JournalEntry) -> anyhow::Result<()>;
}

/// Discards every entry.
pub struct NoopJournal;

#[async_trait]
impl SubmissionJournal for NoopJournal {
    async fn record(&self, _: &JournalEntry) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Writes entries into `waybill_submissions`.
pub struct SqlxSubmissionJournal {
    pool: AnyPool,
}

impl SqlxSubmissionJournal {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubmissionJournal for SqlxSubmissionJournal {
    async fn record(&self, entry: &JournalEntry) -> anyhow::Result<()> {
        sqlx::query(
            r#"
INSERT INTO waybill_submissions
  (submission_id, trace_id, reference, vendor, waybill, booking_reference,
   outcome, message, attempts, recorded_at_ms)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(entry.submission_id.to_string())
        .bind(&entry.trace_id)
        .bind(&entry.reference)
        .bind(&entry.vendor)
        .bind(entry.waybill.clone())
        .bind(entry.booking_reference.clone())
        .bind(&entry.outcome)
        .bind(&entry.message)
        .bind(i64::from(entry.attempts))
        .bind(entry.recorded_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .with_context(|| format!("journal submission {}", entry.submission_id))?;

        Ok(())
    }
}
