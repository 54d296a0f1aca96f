//! Per-chunk hash, derive, encrypt, hash, upload pipeline (and the
//! inverse for playback).

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::external::ObjectStore;
use crate::keyvault::{ChunkKey, KeyVault, SessionKey};
use crate::primitives::{aes_gcm_decrypt, aes_gcm_encrypt, random_bytes, sha256};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub chunk_index: u32,
    pub cid: String,
    pub size: usize,
    pub plaintext_hash: [u8; 32],
    pub encrypted_hash: [u8; 32],
    pub iv: [u8; 12],
    pub captured_at_ms: u64,
}

pub struct ChunkProcessor {
    object_store: Arc<dyn ObjectStore>,
}

impl ChunkProcessor {
    pub fn new(object_store: Arc<dyn ObjectStore>) -> Self {
        Self { object_store }
    }

    pub async fn process(
        &self,
        session_key: &SessionKey,
        blob: &[u8],
        index: u32,
        captured_at_ms: u64,
    ) -> Result<ChunkMeta> {
        let plaintext_hash = sha256(blob);
        let key: ChunkKey = KeyVault::chunk_key(session_key, index)?;
        let iv = random_bytes::<12>();
        let encrypted = aes_gcm_encrypt(&key, &iv, blob)?;
        let encrypted_hash = sha256(&encrypted);

        let size = encrypted.len();
        let cid = self
            .object_store
            .upload(encrypted, &format!("chunk-{index:08}.bin"))
            .await?;

        Ok(ChunkMeta {
            chunk_index: index,
            cid,
            size,
            plaintext_hash,
            encrypted_hash,
            iv,
            captured_at_ms,
        })
    }

    pub async fn decrypt(
        &self,
        session_key: &SessionKey,
        meta: &ChunkMeta,
    ) -> Result<Vec<u8>> {
        let encrypted = self.object_store.fetch(&meta.cid).await?;
        let actual_encrypted_hash = sha256(&encrypted);
        if actual_encrypted_hash != meta.encrypted_hash {
            return Err(crate::error::WitnessError::Integrity(format!(
                "chunk {}: encrypted hash mismatch",
                meta.chunk_index
            )));
        }
        let key: ChunkKey = KeyVault::chunk_key(session_key, meta.chunk_index)?;
        let plaintext = aes_gcm_decrypt(&key, &meta.iv, &encrypted)?;
        let actual_plaintext_hash = sha256(&plaintext);
        if actual_plaintext_hash != meta.plaintext_hash {
            return Err(crate::error::WitnessError::Integrity(format!(
                "chunk {}: plaintext hash mismatch",
                meta.chunk_index
            )));
        }
        Ok(plaintext)
    }
}
