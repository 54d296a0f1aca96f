//! Key derivation and wrapping: master key from a signed domain message,
//! per-session and per-chunk keys, and group-secret-based wrapping.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Mutex;

use crate::error::Result;
use crate::external::{SigningProvider, TypedMessage};
use crate::primitives::{aes_gcm_decrypt, aes_gcm_encrypt, hkdf_sha256_key, normalize_low_s, random_bytes, sha256};

const MASTER_KEY_INFO: &[u8] = b"AES-256-GCM-master-key";
const GROUP_WRAP_INFO: &[u8] = b"AES-256-GCM-group-wrapping";
const CHUNK_KEY_SALT: &[u8] = b"witness-chunk";
const GROUP_KEY_SALT: &[u8] = b"witness-protocol:group-key";

pub type SessionKey = [u8; 32];
pub type ChunkKey = [u8; 32];
pub type MasterKey = [u8; 32];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrappedKey {
    pub iv: [u8; 12],
    pub wrapped: Vec<u8>,
}

/// Caches the normalized signature used to derive the master key so the
/// user is not prompted repeatedly within a session. Keyed by signer
/// address: a mismatch invalidates the cache rather than reusing stale
/// key material for a different signer.
pub struct KeyVault {
    cached: Mutex<Option<(String, MasterKey)>>,
}

impl Default for KeyVault {
    fn default() -> Self {
        Self {
            cached: Mutex::new(None),
        }
    }
}

impl KeyVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn derive_master_key(
        &self,
        provider: &dyn SigningProvider,
        chain_id: u64,
    ) -> Result<MasterKey> {
        let address = provider.address().await?;
        if let Some((cached_addr, key)) = self.cached.lock().unwrap().as_ref() {
            if cached_addr == &address {
                return Ok(*key);
            }
        }

        let message = TypedMessage {
            domain_name: "Witness Protocol".into(),
            domain_version: "1".into(),
            chain_id,
            primary_type: "EncryptionKeyRequest".into(),
            payload: json!({
                "purpose": "Derive master encryption key for evidence protection",
                "application": "witness-protocol",
                "keyVersion": 1,
            }),
        };
        let signature = provider.sign_typed_data(&message).await?;
        let normalized = normalize_low_s(&signature)?;

        let salt = format!("witness-protocol:{}", address.to_lowercase());
        let key = hkdf_sha256_key(&normalized, salt.as_bytes(), MASTER_KEY_INFO)?;

        *self.cached.lock().unwrap() = Some((address, key));
        Ok(key)
    }

    pub fn session_key(&self) -> SessionKey {
        random_bytes::<32>()
    }

    pub fn derive_group_id(secret: &[u8; 32]) -> [u8; 32] {
        sha256(secret)
    }

    fn group_wrapping_key(group_secret: &[u8; 32]) -> Result<[u8; 32]> {
        hkdf_sha256_key(group_secret, GROUP_KEY_SALT, GROUP_WRAP_INFO)
    }

    pub fn wrap(&self, session_key: &SessionKey, group_secret: &[u8; 32]) -> Result<WrappedKey> {
        let wrapping_key = Self::group_wrapping_key(group_secret)?;
        let iv = random_bytes::<12>();
        let wrapped = aes_gcm_encrypt(&wrapping_key, &iv, session_key)?;
        Ok(WrappedKey { iv, wrapped })
    }

    pub fn unwrap_for_chunks(&self, wrapped: &WrappedKey, group_secret: &[u8; 32]) -> Result<SessionKey> {
        let wrapping_key = Self::group_wrapping_key(group_secret)?;
        let plaintext = aes_gcm_decrypt(&wrapping_key, &wrapped.iv, &wrapped.wrapped)?;
        let mut key = [0u8; 32];
        key.copy_from_slice(&plaintext);
        Ok(key)
    }

    pub fn chunk_key(session_key: &SessionKey, index: u32) -> Result<ChunkKey> {
        hkdf_sha256_key(session_key, CHUNK_KEY_SALT, &index.to_be_bytes())
    }
}
