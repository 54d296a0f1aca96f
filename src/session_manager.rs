//! Orchestrates one recording: wires the chunk processor, upload queue,
//! merkle tree, and manifest builder, and anchors progress to the
//! registry after each chunk.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::chunk_processor::ChunkProcessor;
use crate::config::WitnessConfig;
use crate::error::{Result, WitnessError};
use crate::external::{ObjectStore, Registry};
use crate::keyvault::{SessionKey, WrappedKey};
use crate::manifest::{ManifestBuilder, SessionStatus};
use crate::merkle::{compute_leaf, MerkleTree};
use crate::secure_store::SecureStore;
use crate::upload_queue::{QueueEvent, UploadQueue};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SessionRecordStatus {
    Recording,
    Uploading,
    Complete,
    Interrupted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub status: SessionRecordStatus,
    pub group_ids: Vec<[u8; 32]>,
    pub created_at_ms: u64,
    pub completed_at_ms: Option<u64>,
    pub interrupted_at_ms: Option<u64>,
    pub discarded_at_ms: Option<u64>,
    pub chunk_count: u32,
    pub latest_manifest_cid: Option<String>,
    pub latest_merkle_root: Option<[u8; 32]>,
}

/// Encodes a session UUID as the 32-byte word the ledger expects: the
/// UUID with hyphens stripped, right-padded with zero bytes.
pub fn session_id_to_ledger_word(session_id: &Uuid) -> [u8; 32] {
    let hex_str = session_id.simple().to_string();
    let mut bytes = [0u8; 32];
    let decoded = hex::decode(&hex_str).expect("uuid simple form is always valid hex");
    bytes[..decoded.len()].copy_from_slice(&decoded);
    bytes
}

pub struct ChunkOutcome {
    pub chunk_index: u32,
    pub cid: String,
    pub merkle_root: [u8; 32],
    pub manifest_cid: String,
    pub tx_hash: Option<String>,
}

pub struct Session {
    pub record: SessionRecord,
    session_key: SessionKey,
    tree: Mutex<MerkleTree>,
    manifest: Mutex<ManifestBuilder>,
    queue: UploadQueue,
    registry: Arc<dyn Registry>,
    confirmation_timeout: std::time::Duration,
    next_index: Mutex<u32>,
}

impl Session {
    pub async fn create(
        content_id: String,
        uploader: String,
        group_ids: Vec<[u8; 32]>,
        session_key: SessionKey,
        access_list: HashMap<String, WrappedKey>,
        object_store: Arc<dyn ObjectStore>,
        registry: Arc<dyn Registry>,
        store: Arc<SecureStore>,
        config: &WitnessConfig,
        now_ms: u64,
    ) -> Result<Self> {
        let session_id = Uuid::new_v4();
        let processor = Arc::new(ChunkProcessor::new(object_store.clone()));
        let queue = UploadQueue::new(
            processor,
            config.retry_policy.clone(),
            store,
            &session_id.to_string(),
        )?;
        let mut manifest = ManifestBuilder::new(
            content_id,
            session_id.to_string(),
            uploader,
            now_ms,
            object_store,
        );
        manifest.set_access_list(access_list);

        Ok(Self {
            record: SessionRecord {
                session_id,
                status: SessionRecordStatus::Recording,
                group_ids,
                created_at_ms: now_ms,
                completed_at_ms: None,
                interrupted_at_ms: None,
                discarded_at_ms: None,
                chunk_count: 0,
                latest_manifest_cid: None,
                latest_merkle_root: None,
            },
            session_key,
            tree: Mutex::new(MerkleTree::new()),
            manifest: Mutex::new(manifest),
            queue,
            registry,
            confirmation_timeout: std::time::Duration::from_secs(
                config.anchor_confirmation_timeout_secs,
            ),
            next_index: Mutex::new(0),
        })
    }

    pub async fn process_chunk(
        &mut self,
        blob: Vec<u8>,
        duration_ms: u64,
        captured_at_ms: u64,
        location: Option<String>,
    ) -> Result<ChunkOutcome> {
        let index = {
            let mut next = self.next_index.lock().await;
            let i = *next;
            *next += 1;
            i
        };

        self.queue.enqueue(index, blob, captured_at_ms).await?;

        let mut completed = None;
        self.queue
            .drain(&self.session_key, |event| {
                if let QueueEvent::Complete { chunk_index, result } = event {
                    if chunk_index == index {
                        completed = Some(result);
                    }
                }
            })
            .await?;
        let meta = completed
            .ok_or_else(|| WitnessError::Transport(format!("chunk {index} failed to upload")))?;

        let leaf = compute_leaf(index, &meta.plaintext_hash, &meta.encrypted_hash, captured_at_ms);
        let root = {
            let mut tree = self.tree.lock().await;
            tree.insert(leaf);
            tree.root().expect("tree is non-empty after insert")
        };

        let manifest_cid = {
            let mut manifest = self.manifest.lock().await;
            manifest.add_chunk(&meta, duration_ms, location);
            manifest.set_root(root);
            manifest.touch(captured_at_ms);
            manifest.upload().await?
        };

        self.record.chunk_count += 1;
        self.record.latest_manifest_cid = Some(manifest_cid.clone());
        self.record.latest_merkle_root = Some(root);

        let session_word = session_id_to_ledger_word(&self.record.session_id);
        let tx_hash = match self
            .registry
            .update_session(
                session_word,
                root,
                manifest_cid.clone(),
                self.record.chunk_count as u64,
                self.record.group_ids.clone(),
            )
            .await
        {
            Ok(tx_hash) => {
                match tokio::time::timeout(
                    self.confirmation_timeout,
                    self.registry.wait_for_confirmation(&tx_hash),
                )
                .await
                {
                    Ok(Ok(())) => Some(tx_hash),
                    Ok(Err(e)) => {
                        log::warn!("anchor confirmation failed for chunk {index}: {e}");
                        None
                    }
                    Err(_) => {
                        log::warn!("anchor confirmation timed out for chunk {index}");
                        None
                    }
                }
            }
            Err(e) => {
                log::warn!("anchor submission failed for chunk {index}: {e}");
                None
            }
        };

        Ok(ChunkOutcome {
            chunk_index: index,
            cid: meta.cid,
            merkle_root: root,
            manifest_cid,
            tx_hash,
        })
    }

    pub async fn end_session(&mut self) -> Result<()> {
        let mut manifest = self.manifest.lock().await;
        manifest.set_status(SessionStatus::Complete);
        manifest.upload().await?;
        drop(manifest);
        self.record.status = SessionRecordStatus::Complete;
        Ok(())
    }

    pub async fn mark_interrupted(&mut self, now_ms: u64) -> Result<()> {
        let mut manifest = self.manifest.lock().await;
        manifest.set_status(SessionStatus::Interrupted);
        manifest.upload().await?;
        drop(manifest);
        self.record.status = SessionRecordStatus::Interrupted;
        self.record.interrupted_at_ms = Some(now_ms);
        Ok(())
    }
}
