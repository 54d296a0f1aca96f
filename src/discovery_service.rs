//! Aggregates readable content across a user's direct uploads and their
//! groups, and replays a manifest's chunk list back into a playable blob
//! while re-verifying every hash and the final merkle root.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::chunk_processor::ChunkProcessor;
use crate::error::{Result, WitnessError};
use crate::external::{ContentInfo, ObjectStore, Registry};
use crate::keyvault::{KeyVault, SessionKey, WrappedKey};
use crate::manifest::Manifest;
use crate::merkle::{compute_leaf, MerkleTree};
use crate::primitives::from_hex;

struct CacheEntry<T> {
    value: T,
    fetched_at: Instant,
}

pub struct DiscoveryService {
    registry: Arc<dyn Registry>,
    object_store: Arc<dyn ObjectStore>,
    cache_ttl: Duration,
    content_cache: Mutex<HashMap<[u8; 32], CacheEntry<ContentInfo>>>,
    manifest_cache: Mutex<HashMap<String, CacheEntry<Manifest>>>,
}

impl DiscoveryService {
    pub fn new(registry: Arc<dyn Registry>, object_store: Arc<dyn ObjectStore>, cache_ttl: Duration) -> Self {
        Self {
            registry,
            object_store,
            cache_ttl,
            content_cache: Mutex::new(HashMap::new()),
            manifest_cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn discover(&self, addr: &str, group_ids: &[[u8; 32]]) -> Result<Vec<[u8; 32]>> {
        let mut ids: HashSet<[u8; 32]> = self.registry.user_content(addr).await?.into_iter().collect();
        for group_id in group_ids {
            ids.extend(self.registry.group_content(group_id).await?);
        }
        Ok(ids.into_iter().collect())
    }

    pub async fn content_info(&self, content_id: &[u8; 32]) -> Result<ContentInfo> {
        if let Some(entry) = self.content_cache.lock().await.get(content_id) {
            if entry.fetched_at.elapsed() < self.cache_ttl {
                return Ok(entry.value.clone());
            }
        }
        let info = self
            .registry
            .content(content_id)
            .await?
            .ok_or_else(|| WitnessError::UserInput("unknown content id".into()))?;
        self.content_cache.lock().await.insert(
            *content_id,
            CacheEntry {
                value: info.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(info)
    }

    async fn fetch_manifest(&self, manifest_cid: &str) -> Result<Manifest> {
        if let Some(entry) = self.manifest_cache.lock().await.get(manifest_cid) {
            if entry.fetched_at.elapsed() < self.cache_ttl {
                return Ok(entry.value.clone());
            }
        }
        let bytes = self.object_store.fetch(manifest_cid).await?;
        let manifest: Manifest = serde_json::from_slice(&bytes)?;
        self.manifest_cache.lock().await.insert(
            manifest_cid.to_string(),
            CacheEntry {
                value: manifest.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(manifest)
    }

    /// Which of the caller's groups, if any, can decrypt `content_id`.
    pub async fn accessible_groups(&self, content_id: &[u8; 32], held_groups: &[[u8; 32]]) -> Result<Vec<[u8; 32]>> {
        let groups_on_chain: HashSet<[u8; 32]> =
            self.registry.content_groups(content_id).await?.into_iter().collect();
        Ok(held_groups
            .iter()
            .copied()
            .filter(|g| groups_on_chain.contains(g))
            .collect())
    }

    /// Downloads, decrypts, and integrity-checks every chunk of
    /// `content_id`, returning the concatenated plaintext. Recomputes
    /// the merkle root from the downloaded chunk metadata and compares
    /// it against the on-ledger root before returning.
    pub async fn playback(
        &self,
        content_id: &[u8; 32],
        group_secret: &[u8; 32],
    ) -> Result<Vec<u8>> {
        let info = self.content_info(content_id).await?;
        let manifest = self.fetch_manifest(&info.manifest_cid).await?;

        let group_id = KeyVault::derive_group_id(group_secret);
        let wrapped = manifest
            .access_list
            .get(&hex::encode(group_id))
            .ok_or_else(|| WitnessError::UserInput("caller's group has no access grant for this content".into()))?;
        let wrapped_key = WrappedKey {
            iv: from_hex(&wrapped.iv)?
                .try_into()
                .map_err(|_| WitnessError::Integrity("malformed wrapped-key iv".into()))?,
            wrapped: crate::primitives::from_base64(&wrapped.wrapped_key)?,
        };

        let vault = KeyVault::new();
        let session_key: SessionKey = vault.unwrap_for_chunks(&wrapped_key, group_secret)?;
        let processor = ChunkProcessor::new(self.object_store.clone());

        let mut plaintext = Vec::new();
        let mut tree = MerkleTree::new();
        for chunk in &manifest.chunks {
            let plaintext_hash: [u8; 32] = from_hex(&chunk.plaintext_hash)?
                .try_into()
                .map_err(|_| WitnessError::Integrity("malformed plaintext hash".into()))?;
            let encrypted_hash: [u8; 32] = from_hex(&chunk.encrypted_hash)?
                .try_into()
                .map_err(|_| WitnessError::Integrity("malformed encrypted hash".into()))?;
            let iv: [u8; 12] = crate::primitives::from_base64(&chunk.iv)?
                .try_into()
                .map_err(|_| WitnessError::Integrity("malformed chunk iv".into()))?;

            let meta = crate::chunk_processor::ChunkMeta {
                chunk_index: chunk.index,
                cid: chunk.cid.clone(),
                size: chunk.size,
                plaintext_hash,
                encrypted_hash,
                iv,
                captured_at_ms: chunk.captured_at,
            };
            let chunk_plaintext = processor.decrypt(&session_key, &meta).await?;
            plaintext.extend_from_slice(&chunk_plaintext);

            let leaf = compute_leaf(chunk.index, &plaintext_hash, &encrypted_hash, chunk.captured_at);
            tree.insert(leaf);
        }

        let recomputed_root = tree.root();
        let expected_root = Some(info.merkle_root);
        if recomputed_root != expected_root {
            return Err(WitnessError::Integrity(
                "recomputed merkle root does not match the on-ledger root".into(),
            ));
        }

        Ok(plaintext)
    }
}
