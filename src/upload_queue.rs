//! Durable, strictly-ordered per-session upload queue. Concurrency is
//! fixed at 1 per session so a chunk's anchor never races its successor.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::chunk_processor::{ChunkMeta, ChunkProcessor};
use crate::config::RetryPolicy;
use crate::error::{Result, WitnessError};
use crate::keyvault::SessionKey;
use crate::secure_store::SecureStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Uploading,
    Uploaded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkTask {
    pub chunk_index: u32,
    pub status: TaskStatus,
    pub raw_blob: Option<Vec<u8>>,
    pub captured_at_ms: u64,
    pub result: Option<ChunkMeta>,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum QueueEvent {
    Complete { chunk_index: u32, result: ChunkMeta },
    Retry { chunk_index: u32, attempt: u32, delay_ms: u64 },
    Error { chunk_index: u32, attempts: u32 },
}

/// FIFO of chunk upload tasks for a single session. `drain` processes
/// tasks one at a time, in order, applying the configured retry policy;
/// it never starts task `i+1` before task `i` reaches a terminal state.
///
/// Every task mutation is persisted to `store` under a session-scoped
/// key before the in-memory lock is released, so a process restart can
/// reconstruct the exact pending/uploading/failed state via `new`.
pub struct UploadQueue {
    processor: Arc<ChunkProcessor>,
    retry_policy: RetryPolicy,
    store: Arc<SecureStore>,
    store_key: String,
    tasks: Mutex<VecDeque<ChunkTask>>,
}

impl UploadQueue {
    fn store_key_for(session_id: &str) -> String {
        format!("upload_queue:{session_id}")
    }

    /// Opens the queue for `session_id`, loading any tasks already
    /// persisted under that session (e.g. by a prior process that
    /// crashed mid-upload).
    pub fn new(
        processor: Arc<ChunkProcessor>,
        retry_policy: RetryPolicy,
        store: Arc<SecureStore>,
        session_id: &str,
    ) -> Result<Self> {
        let store_key = Self::store_key_for(session_id);
        let tasks: VecDeque<ChunkTask> = store.get(&store_key)?.unwrap_or_default();
        Ok(Self {
            processor,
            retry_policy,
            store,
            store_key,
            tasks: Mutex::new(tasks),
        })
    }

    fn persist(&self, tasks: &VecDeque<ChunkTask>) -> Result<()> {
        self.store.put(&self.store_key, tasks)
    }

    pub async fn enqueue(&self, chunk_index: u32, blob: Vec<u8>, captured_at_ms: u64) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        tasks.push_back(ChunkTask {
            chunk_index,
            status: TaskStatus::Pending,
            raw_blob: Some(blob),
            captured_at_ms,
            result: None,
            retry_count: 0,
            last_error: None,
        });
        self.persist(&tasks)
    }

    pub async fn pending_and_failed_count(&self) -> usize {
        self.tasks
            .lock()
            .await
            .iter()
            .filter(|t| !matches!(t.status, TaskStatus::Uploaded))
            .count()
    }

    pub async fn snapshot(&self) -> Vec<ChunkTask> {
        self.tasks.lock().await.iter().cloned().collect()
    }

    /// Resets every `Failed` task back to `Pending` with a fresh retry
    /// budget, for use by the recovery pass after resuming a session.
    pub async fn reset_failed(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        for task in tasks.iter_mut() {
            if task.status == TaskStatus::Failed {
                task.status = TaskStatus::Pending;
                task.retry_count = 0;
                task.last_error = None;
            }
        }
        self.persist(&tasks)
    }

    /// Drops every task that has not reached `Uploaded`, for use when a
    /// session is discarded rather than resumed.
    pub async fn purge_unfinished(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|t| matches!(t.status, TaskStatus::Uploaded));
        self.persist(&tasks)
    }

    /// Drains every task currently in the queue to a terminal state,
    /// strictly in FIFO order, emitting an event per outcome.
    pub async fn drain<F: FnMut(QueueEvent)>(
        &self,
        session_key: &SessionKey,
        mut on_event: F,
    ) -> Result<()> {
        loop {
            let next_index = {
                let tasks = self.tasks.lock().await;
                tasks
                    .iter()
                    .position(|t| matches!(t.status, TaskStatus::Pending))
            };
            let Some(idx) = next_index else { break };

            let (chunk_index, captured_at_ms, blob) = {
                let mut tasks = self.tasks.lock().await;
                let task = &mut tasks[idx];
                task.status = TaskStatus::Uploading;
                let blob = task
                    .raw_blob
                    .clone()
                    .ok_or_else(|| WitnessError::State("task has no raw blob".into()))?;
                let chunk_index = task.chunk_index;
                let captured_at_ms = task.captured_at_ms;
                self.persist(&tasks)?;
                (chunk_index, captured_at_ms, blob)
            };

            match self
                .processor
                .process(session_key, &blob, chunk_index, captured_at_ms)
                .await
            {
                Ok(result) => {
                    let mut tasks = self.tasks.lock().await;
                    let task = &mut tasks[idx];
                    task.status = TaskStatus::Uploaded;
                    task.raw_blob = None;
                    task.result = Some(result.clone());
                    self.persist(&tasks)?;
                    drop(tasks);
                    on_event(QueueEvent::Complete { chunk_index, result });
                }
                Err(e) => {
                    let mut tasks = self.tasks.lock().await;
                    let task = &mut tasks[idx];
                    task.retry_count += 1;
                    task.last_error = Some(e.to_string());
                    if task.retry_count >= self.retry_policy.max_retries {
                        task.status = TaskStatus::Failed;
                        let attempts = task.retry_count;
                        self.persist(&tasks)?;
                        drop(tasks);
                        log::warn!("chunk {chunk_index} failed after {attempts} attempts: {e}");
                        on_event(QueueEvent::Error { chunk_index, attempts });
                    } else {
                        task.status = TaskStatus::Pending;
                        let attempt = task.retry_count;
                        let delay = self.retry_policy.delay_for_attempt(attempt);
                        self.persist(&tasks)?;
                        drop(tasks);
                        log::debug!("retrying chunk {chunk_index} (attempt {attempt}) in {delay:?}");
                        on_event(QueueEvent::Retry {
                            chunk_index,
                            attempt,
                            delay_ms: delay.as_millis() as u64,
                        });
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Ok(())
    }
}
