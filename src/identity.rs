//! Anonymous ZK identity: a private scalar and its Poseidon commitment,
//! derived from a signed domain message distinct from the one used for
//! the master encryption key, so a leaked commitment never reveals the
//! master key signature or vice versa.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Result, WitnessError};
use crate::external::{SigningProvider, TypedMessage};
use crate::merkle::{MerkleProof, Position};
use crate::secure_store::SecureStore;

const IDENTITY_STORE_KEY: &str = "semaphore_identity";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub private_scalar: [u8; 32],
    pub commitment: [u8; 32],
    /// The signature-derived seed this identity was constructed from.
    /// Kept so a full `semaphore_rs::identity::Identity` (trapdoor +
    /// nullifier) can be reconstructed on demand for proof generation,
    /// without widening every other field of this struct.
    pub(crate) seed: Vec<u8>,
}

impl Identity {
    fn from_seed(seed: &[u8]) -> Result<Self> {
        let semaphore_identity = semaphore_rs::identity::Identity::from_secret(&mut seed.to_vec(), None);
        let private_scalar = field_to_bytes(semaphore_identity.nullifier);
        let commitment = field_to_bytes(semaphore_identity.commitment());
        Ok(Self {
            private_scalar,
            commitment,
            seed: seed.to_vec(),
        })
    }

    fn to_semaphore_identity(&self) -> semaphore_rs::identity::Identity {
        semaphore_rs::identity::Identity::from_secret(&mut self.seed.clone(), None)
    }
}

/// Generates a real Semaphore Groth16 membership proof binding `identity`
/// to `inclusion_proof` (the caller's path through the locally-rebuilt
/// group tree), scoped and signaled by `content_id`. Returns the eight
/// field elements the ledger's verifier expects.
pub(crate) fn generate_membership_proof(
    identity: &Identity,
    inclusion_proof: &MerkleProof,
    content_id: &[u8; 32],
) -> Result<[[u8; 32]; 8]> {
    let semaphore_identity = identity.to_semaphore_identity();
    let branch: Vec<semaphore_rs::merkle_tree::Branch<semaphore_rs::Field>> = inclusion_proof
        .siblings
        .iter()
        .map(|sibling| {
            let hash = bytes_to_field(&sibling.hash);
            match sibling.position {
                Position::Left => semaphore_rs::merkle_tree::Branch::Left(hash),
                Position::Right => semaphore_rs::merkle_tree::Branch::Right(hash),
            }
        })
        .collect();

    let scope = bytes_to_field(content_id);
    let message = bytes_to_field(content_id);

    let proof = semaphore_rs::protocol::generate_proof(&semaphore_identity, &branch, scope, message)
        .map_err(|e| WitnessError::Crypto(format!("zk proof generation failed: {e}")))?;

    let fields: [semaphore_rs::Field; 8] = proof.into();
    let mut out = [[0u8; 32]; 8];
    for (slot, field) in out.iter_mut().zip(fields) {
        *slot = field_to_bytes(field);
    }
    Ok(out)
}

pub(crate) fn field_to_bytes(value: semaphore_rs::Field) -> [u8; 32] {
    let bytes: [u8; 32] = value.into();
    bytes
}

pub(crate) fn bytes_to_field(bytes: &[u8; 32]) -> semaphore_rs::Field {
    (*bytes).into()
}

/// Derives the Poseidon nullifier for `identity` scoped to `content_id`.
/// Deterministic: the same identity attesting to the same content always
/// produces the same nullifier, which is what lets the ledger reject a
/// duplicate attestation without learning who submitted it.
pub fn derive_nullifier(private_scalar: &[u8; 32], content_id: &[u8; 32]) -> [u8; 32] {
    let secret = bytes_to_field(private_scalar);
    let scope = bytes_to_field(content_id);
    let nullifier = semaphore_rs::poseidon::hash2(secret, scope);
    field_to_bytes(nullifier)
}

pub async fn get_or_create(
    store: &SecureStore,
    provider: &dyn SigningProvider,
    chain_id: u64,
) -> Result<Identity> {
    if let Some(existing) = store.get::<Identity>(IDENTITY_STORE_KEY)? {
        return Ok(existing);
    }

    let message = TypedMessage {
        domain_name: "Witness Protocol".into(),
        domain_version: "1".into(),
        chain_id,
        primary_type: "SemaphoreIdentityRequest".into(),
        payload: json!({
            "purpose": "Derive anonymous attestation identity",
            "application": "witness-protocol",
            "identityVersion": 1,
        }),
    };
    let signature = provider.sign_typed_data(&message).await?;
    let normalized = crate::primitives::normalize_low_s(&signature)?;

    let identity = Identity::from_seed(&normalized)
        .map_err(|_| WitnessError::KeyDerivation("failed to derive zk identity".into()))?;
    store.put(IDENTITY_STORE_KEY, &identity)?;
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::FakeSigningProvider;
    use crate::keyvault::KeyVault;

    fn temp_store() -> SecureStore {
        let dir = tempfile::tempdir().unwrap();
        SecureStore::open(dir.into_path(), [0u8; 32]).unwrap()
    }

    #[tokio::test]
    async fn identity_is_deterministic_across_reinstalls() {
        let provider = FakeSigningProvider::new("0xidentity");
        let store_a = temp_store();
        let store_b = temp_store();
        let id_a = get_or_create(&store_a, &provider, 1).await.unwrap();
        let id_b = get_or_create(&store_b, &provider, 1).await.unwrap();
        assert_eq!(id_a.private_scalar, id_b.private_scalar);
        assert_eq!(id_a.commitment, id_b.commitment);
    }

    #[tokio::test]
    async fn identity_persists_after_first_creation() {
        let provider = FakeSigningProvider::new("0xpersist");
        let store = temp_store();
        let first = get_or_create(&store, &provider, 1).await.unwrap();
        let second = get_or_create(&store, &provider, 1).await.unwrap();
        assert_eq!(first.commitment, second.commitment);
    }

    #[test]
    fn nullifier_is_deterministic_and_scope_sensitive() {
        let scalar = [3u8; 32];
        let content_a = [1u8; 32];
        let content_b = [2u8; 32];
        let n1 = derive_nullifier(&scalar, &content_a);
        let n2 = derive_nullifier(&scalar, &content_a);
        let n3 = derive_nullifier(&scalar, &content_b);
        assert_eq!(n1, n2);
        assert_ne!(n1, n3);
        let _ = KeyVault::new();
    }
}
