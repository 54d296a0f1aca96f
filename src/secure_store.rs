//! Encrypted persistent key/value store for group secrets, the local ZK
//! identity, and local attestation receipts. Each entry is a JSON blob
//! sealed under the master key with a fresh IV.

use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::Result;
use crate::primitives::{aes_gcm_decrypt, aes_gcm_encrypt, random_bytes};

#[derive(serde::Serialize, serde::Deserialize)]
struct SealedEntry {
    iv: [u8; 12],
    ciphertext: Vec<u8>,
}

/// Envelope-encrypted store backed by one file per directory, keyed by
/// logical name (`group_secrets`, `semaphore_identity`,
/// `local_attestations`). Reads and writes are serialized per key via an
/// in-process lock; callers across processes are not supported.
pub struct SecureStore {
    dir: PathBuf,
    master_key: [u8; 32],
    cache: RwLock<HashMap<String, Vec<u8>>>,
}

impl SecureStore {
    pub fn open(dir: PathBuf, master_key: [u8; 32]) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            master_key,
            cache: RwLock::new(HashMap::new()),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.bin"))
    }

    fn read_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(cached) = self.cache.read().unwrap().get(key) {
            return Ok(Some(cached.clone()));
        }
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        let sealed: SealedEntry = serde_json::from_slice(&bytes)?;
        let plaintext = aes_gcm_decrypt(&self.master_key, &sealed.iv, &sealed.ciphertext)?;
        self.cache
            .write()
            .unwrap()
            .insert(key.to_string(), plaintext.clone());
        Ok(Some(plaintext))
    }

    fn write_raw(&self, key: &str, plaintext: &[u8]) -> Result<()> {
        let iv = random_bytes::<12>();
        let ciphertext = aes_gcm_encrypt(&self.master_key, &iv, plaintext)?;
        let sealed = SealedEntry { iv, ciphertext };
        let bytes = serde_json::to_vec(&sealed)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &path)?;
        self.cache
            .write()
            .unwrap()
            .insert(key.to_string(), plaintext.to_vec());
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_raw(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.write_raw(key, &bytes)
    }

    /// Atomically reads, transforms, and writes back the value at `key`.
    pub fn update<T, F>(&self, key: &str, default: T, f: F) -> Result<()>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T),
    {
        let mut value = self.get::<T>(key)?.unwrap_or(default);
        f(&mut value);
        self.put(key, &value)
    }

    pub fn clear(&self) -> Result<()> {
        self.cache.write().unwrap().clear();
        if self.dir.exists() {
            for entry in std::fs::read_dir(&self.dir)? {
                let entry = entry?;
                if entry.path().extension().and_then(|e| e.to_str()) == Some("bin") {
                    std::fs::remove_file(entry.path())?;
                }
            }
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdMap;

    fn store() -> (tempfile::TempDir, SecureStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SecureStore::open(dir.path().to_path_buf(), [5u8; 32]).unwrap();
        (dir, store)
    }

    #[test]
    fn put_and_get_round_trip() {
        let (_dir, store) = store();
        store.put("greeting", &"hello".to_string()).unwrap();
        let value: Option<String> = store.get("greeting").unwrap();
        assert_eq!(value, Some("hello".to_string()));
    }

    #[test]
    fn missing_key_returns_none() {
        let (_dir, store) = store();
        let value: Option<String> = store.get("missing").unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn wrong_master_key_cannot_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let store_a = SecureStore::open(dir.path().to_path_buf(), [1u8; 32]).unwrap();
        store_a.put("secret", &"value".to_string()).unwrap();

        let store_b = SecureStore::open(dir.path().to_path_buf(), [2u8; 32]).unwrap();
        let result: Result<Option<String>> = store_b.get("secret");
        assert!(result.is_err());
    }

    #[test]
    fn update_is_atomic_read_modify_write() {
        let (_dir, store) = store();
        store
            .update::<StdMap<String, u64>, _>("counts", StdMap::new(), |m| {
                *m.entry("a".into()).or_insert(0) += 1;
            })
            .unwrap();
        store
            .update::<StdMap<String, u64>, _>("counts", StdMap::new(), |m| {
                *m.entry("a".into()).or_insert(0) += 1;
            })
            .unwrap();
        let counts: StdMap<String, u64> = store.get("counts").unwrap().unwrap();
        assert_eq!(counts["a"], 2);
    }

    #[test]
    fn clear_removes_persisted_values() {
        let (_dir, store) = store();
        store.put("k", &1u32).unwrap();
        store.clear().unwrap();
        let value: Option<u32> = store.get("k").unwrap();
        assert!(value.is_none());
    }
}
