//! Low-level cryptographic building blocks: hashing, HKDF, AES-256-GCM,
//! and secp256k1 signature normalization. Every other component is built
//! from these.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use k256::ecdsa::Signature as K256Signature;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{Result, WitnessError};

pub const IV_LEN: usize = 12;
pub const KEY_LEN: usize = 32;

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Derives `out_len` bytes via HKDF-SHA256 from `ikm`, `salt`, and `info`.
pub fn hkdf_sha256(ikm: &[u8], salt: &[u8], info: &[u8], out_len: usize) -> Result<Vec<u8>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut out = vec![0u8; out_len];
    hk.expand(info, &mut out)
        .map_err(|e| WitnessError::KeyDerivation(format!("hkdf expand failed: {e}")))?;
    Ok(out)
}

/// Derives a 32-byte AES-256-GCM key via HKDF-SHA256.
pub fn hkdf_sha256_key(ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<[u8; KEY_LEN]> {
    let bytes = hkdf_sha256(ikm, salt, info, KEY_LEN)?;
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&bytes);
    Ok(key)
}

pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// Encrypts `plaintext` under `key`/`iv`, returning `ciphertext || tag`.
pub fn aes_gcm_encrypt(key: &[u8; KEY_LEN], iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(iv);
    cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: &[],
            },
        )
        .map_err(|_| WitnessError::Crypto("AES-GCM encryption failed".into()))
}

/// Decrypts `ciphertext` (which includes the trailing tag) under `key`/`iv`.
/// Any tag mismatch surfaces as a non-retryable `Crypto` error.
pub fn aes_gcm_decrypt(key: &[u8; KEY_LEN], iv: &[u8; IV_LEN], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(iv);
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad: &[],
            },
        )
        .map_err(|_| WitnessError::Crypto("AES-GCM authentication failed".into()))
}

/// Normalizes a secp256k1 ECDSA signature to canonical low-s form so that
/// HKDF input material derived from it is deterministic across signers
/// that may return either s or n-s. Accepts either a bare 64-byte `r||s`
/// signature or a 65-byte `r||s||v` one (the trailing recovery byte, if
/// present, is dropped since only `r||s` feeds the key derivation).
pub fn normalize_low_s(signature_bytes: &[u8]) -> Result<Vec<u8>> {
    let rs = &signature_bytes[..64.min(signature_bytes.len())];
    let mut sig = K256Signature::from_slice(rs)
        .map_err(|e| WitnessError::Crypto(format!("invalid signature: {e}")))?;
    if let Some(normalized) = sig.normalize_s() {
        sig = normalized;
    }
    Ok(sig.to_bytes().to_vec())
}

pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

pub fn from_hex(s: &str) -> Result<Vec<u8>> {
    Ok(hex::decode(s.trim_start_matches("0x"))?)
}

pub fn to_base64(bytes: &[u8]) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes)
}

pub fn from_base64(s: &str) -> Result<Vec<u8>> {
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, s)
        .map_err(WitnessError::Base64)
}
