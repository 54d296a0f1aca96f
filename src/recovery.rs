//! Startup scan of durable session state: summarizes interrupted
//! sessions and offers resume/discard semantics.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::secure_store::SecureStore;
use crate::session_manager::{SessionRecord, SessionRecordStatus};
use crate::upload_queue::{TaskStatus, UploadQueue};

const SESSIONS_STORE_KEY: &str = "session_records";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySummary {
    pub session_id: String,
    pub pending: usize,
    pub uploaded: usize,
    pub failed: usize,
}

/// Fraction of quota in use above which storage pressure is surfaced.
pub const STORAGE_PRESSURE_THRESHOLD: f64 = 0.8;

pub struct Recovery;

impl Recovery {
    pub fn storage_under_pressure(usage_bytes: u64, quota_bytes: u64) -> bool {
        if quota_bytes == 0 {
            return false;
        }
        (usage_bytes as f64 / quota_bytes as f64) >= STORAGE_PRESSURE_THRESHOLD
    }

    /// Builds a summary for a single interrupted/recording session from
    /// its upload queue snapshot, for presentation to the user as a
    /// resume/discard choice.
    pub async fn summarize(session_id: &str, queue: &UploadQueue) -> RecoverySummary {
        let tasks = queue.snapshot().await;
        let pending = tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Uploading))
            .count();
        let uploaded = tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Uploaded))
            .count();
        let failed = tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Failed))
            .count();
        RecoverySummary {
            session_id: session_id.to_string(),
            pending,
            uploaded,
            failed,
        }
    }

    /// Resumes an interrupted session: resets failed tasks to pending
    /// and flips the durable record to `Uploading`. The queue's pending
    /// tasks already reflect durable state loaded by `UploadQueue::new`,
    /// so nothing beyond the reset is needed to continue draining.
    pub async fn resume(record: &mut SessionRecord, queue: &UploadQueue) -> Result<()> {
        queue.reset_failed().await?;
        record.status = SessionRecordStatus::Uploading;
        Ok(())
    }

    /// Discards an interrupted session: purges not-yet-uploaded tasks
    /// from `queue` and marks the session complete with a `discardedAt`.
    pub async fn discard(record: &mut SessionRecord, queue: &UploadQueue, now_ms: u64) -> Result<()> {
        queue.purge_unfinished().await?;
        record.status = SessionRecordStatus::Complete;
        record.discarded_at_ms = Some(now_ms);
        Ok(())
    }

    pub fn persist_record(store: &SecureStore, record: &SessionRecord) -> Result<()> {
        store.update::<std::collections::HashMap<String, SessionRecord>, _>(
            SESSIONS_STORE_KEY,
            Default::default(),
            |records| {
                records.insert(record.session_id.to_string(), record.clone());
            },
        )
    }

    pub fn interrupted_or_recording(store: &SecureStore) -> Result<Vec<SessionRecord>> {
        let records: std::collections::HashMap<String, SessionRecord> =
            store.get(SESSIONS_STORE_KEY)?.unwrap_or_default();
        Ok(records
            .into_values()
            .filter(|r| {
                matches!(
                    r.status,
                    SessionRecordStatus::Recording | SessionRecordStatus::Uploading
                )
            })
            .collect())
    }
}
