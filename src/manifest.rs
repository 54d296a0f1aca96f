//! Accumulates chunk metadata, the access list, and the running merkle
//! root into an incrementally-published manifest.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::external::ObjectStore;
use crate::keyvault::WrappedKey;
use crate::primitives::{to_base64, to_hex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Recording,
    Complete,
    Interrupted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestChunk {
    pub index: u32,
    pub cid: String,
    pub size: usize,
    pub duration_ms: u64,
    pub plaintext_hash: String,
    pub encrypted_hash: String,
    pub iv: String,
    pub captured_at: u64,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionInfo {
    pub algorithm: String,
    pub key_derivation: String,
}

impl Default for EncryptionInfo {
    fn default() -> Self {
        Self {
            algorithm: "aes-256-gcm".into(),
            key_derivation: "hkdf-sha256".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessGrant {
    pub iv: String,
    pub wrapped_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub content_id: String,
    pub session_id: String,
    pub uploader: String,
    pub capture_started: u64,
    pub last_updated: u64,
    pub chunks: Vec<ManifestChunk>,
    pub merkle_root: Option<String>,
    pub encryption: EncryptionInfo,
    pub access_list: HashMap<String, AccessGrant>,
    pub status: SessionStatus,
}

pub struct ManifestBuilder {
    object_store: Arc<dyn ObjectStore>,
    manifest: Manifest,
}

impl ManifestBuilder {
    pub fn new(
        content_id: String,
        session_id: String,
        uploader: String,
        capture_started: u64,
        object_store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            object_store,
            manifest: Manifest {
                version: 0,
                content_id,
                session_id,
                uploader,
                capture_started,
                last_updated: capture_started,
                chunks: Vec::new(),
                merkle_root: None,
                encryption: EncryptionInfo::default(),
                access_list: HashMap::new(),
                status: SessionStatus::Recording,
            },
        }
    }

    pub fn set_access_list(&mut self, grants: HashMap<String, WrappedKey>) {
        self.manifest.access_list = grants
            .into_iter()
            .map(|(group_id, wrapped)| {
                (
                    group_id,
                    AccessGrant {
                        iv: to_hex(&wrapped.iv),
                        wrapped_key: to_base64(&wrapped.wrapped),
                    },
                )
            })
            .collect();
    }

    pub fn add_chunk(&mut self, meta: &crate::chunk_processor::ChunkMeta, duration_ms: u64, location: Option<String>) {
        if meta.chunk_index as usize != self.manifest.chunks.len() {
            log::warn!(
                "chunk index {} does not match expected next index {}; accepting as given",
                meta.chunk_index,
                self.manifest.chunks.len()
            );
        }
        self.manifest.chunks.push(ManifestChunk {
            index: meta.chunk_index,
            cid: meta.cid.clone(),
            size: meta.size,
            duration_ms,
            plaintext_hash: to_hex(&meta.plaintext_hash),
            encrypted_hash: to_hex(&meta.encrypted_hash),
            iv: to_base64(&meta.iv),
            captured_at: meta.captured_at_ms,
            location,
        });
    }

    pub fn set_root(&mut self, root: [u8; 32]) {
        self.manifest.merkle_root = Some(to_hex(&root));
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.manifest.status = status;
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.manifest.last_updated = now_ms;
        self.manifest.version += 1;
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub async fn upload(&self) -> Result<String> {
        let value = serde_json::to_value(&self.manifest)?;
        self.object_store.upload_json(value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_processor::ChunkMeta;
    use crate::external::FakeObjectStore;

    fn sample_chunk(index: u32) -> ChunkMeta {
        ChunkMeta {
            chunk_index: index,
            cid: format!("cid:{index}"),
            size: 10,
            plaintext_hash: [index as u8; 32],
            encrypted_hash: [index as u8 + 1; 32],
            iv: [0u8; 12],
            captured_at_ms: 1000 + index as u64,
        }
    }

    #[tokio::test]
    async fn empty_manifest_uploads_with_no_chunks() {
        let store = Arc::new(FakeObjectStore::new());
        let builder = ManifestBuilder::new("c1".into(), "s1".into(), "0xup".into(), 0, store);
        assert!(builder.manifest().chunks.is_empty());
        let cid = builder.upload().await.unwrap();
        assert!(!cid.is_empty());
    }

    #[tokio::test]
    async fn accumulates_chunks_in_order() {
        let store = Arc::new(FakeObjectStore::new());
        let mut builder = ManifestBuilder::new("c1".into(), "s1".into(), "0xup".into(), 0, store);
        builder.add_chunk(&sample_chunk(0), 1000, None);
        builder.add_chunk(&sample_chunk(1), 1000, None);
        assert_eq!(builder.manifest().chunks.len(), 2);
        assert_eq!(builder.manifest().chunks[1].index, 1);
    }

    #[test]
    fn set_root_hex_encodes() {
        let store = Arc::new(FakeObjectStore::new());
        let mut builder = ManifestBuilder::new("c1".into(), "s1".into(), "0xup".into(), 0, store);
        builder.set_root([0xABu8; 32]);
        assert_eq!(builder.manifest().merkle_root.as_deref(), Some("ab".repeat(32).as_str()));
    }
}
