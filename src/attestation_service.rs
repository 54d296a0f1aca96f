//! Anonymous attestation: builds a local membership tree matching the
//! on-ledger group, proves commitment membership, and binds a
//! content-scoped nullifier that prevents a second attestation by the
//! same identity without revealing who attested.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Result, WitnessError};
use crate::external::{Registry, ZkProof};
use crate::identity::{derive_nullifier, generate_membership_proof, Identity};
use crate::merkle::MerkleTree;
use crate::primitives::from_hex;
use crate::secure_store::SecureStore;

const ATTESTATIONS_STORE_KEY: &str = "local_attestations";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalAttestation {
    pub group_id: String,
    pub attested_at_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationOutcome {
    pub tx_hash: String,
    pub new_count: u64,
}

pub struct AttestationService {
    registry: Arc<dyn Registry>,
    store: Arc<SecureStore>,
}

impl AttestationService {
    pub fn new(registry: Arc<dyn Registry>, store: Arc<SecureStore>) -> Self {
        Self { registry, store }
    }

    pub fn has_locally_attested(&self, content_id: &str) -> Result<bool> {
        let records: std::collections::HashMap<String, LocalAttestation> =
            self.store.get(ATTESTATIONS_STORE_KEY)?.unwrap_or_default();
        Ok(records.contains_key(content_id))
    }

    pub async fn attest(
        &self,
        content_id_hex: &str,
        group_id: [u8; 32],
        identity: &Identity,
        now_ms: u64,
    ) -> Result<AttestationOutcome> {
        let content_id: [u8; 32] = from_hex(content_id_hex)?
            .try_into()
            .map_err(|_| WitnessError::UserInput("content id must be 32 bytes".into()))?;

        let members = self.registry.group_members_list(&group_id).await?;
        let onchain_root = self.registry.group_membership_root(&group_id).await?;

        let mut tree = MerkleTree::new();
        for commitment in &members {
            tree.insert(*commitment);
        }
        let local_root = tree
            .root()
            .ok_or_else(|| WitnessError::State("group has no members".into()))?;
        if local_root != onchain_root {
            return Err(WitnessError::Integrity(
                "locally rebuilt membership tree does not match on-ledger root".into(),
            ));
        }

        let member_index = members
            .iter()
            .position(|c| *c == identity.commitment)
            .ok_or_else(|| WitnessError::UserInput("identity is not a member of this group".into()))?;

        let membership_proof = tree.proof(member_index)?;
        let nullifier = derive_nullifier(&identity.private_scalar, &content_id);
        let points = generate_membership_proof(identity, &membership_proof, &content_id)?;

        let proof = ZkProof {
            merkle_tree_depth: membership_proof.siblings.len() as u32,
            merkle_tree_root: onchain_root,
            nullifier,
            message: content_id,
            scope: content_id,
            points,
        };

        let tx_hash = self
            .registry
            .attest_to_content(content_id, group_id, proof)
            .await?;
        self.registry.wait_for_confirmation(&tx_hash).await?;
        let new_count = self.registry.attestation_count(&content_id).await?;

        self.store
            .update::<std::collections::HashMap<String, LocalAttestation>, _>(
                ATTESTATIONS_STORE_KEY,
                Default::default(),
                |records| {
                    records.insert(
                        content_id_hex.to_string(),
                        LocalAttestation {
                            group_id: hex::encode(group_id),
                            attested_at_ms: now_ms,
                        },
                    );
                },
            )?;

        Ok(AttestationOutcome { tx_hash, new_count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::FakeRegistry;
    use crate::primitives::to_hex;

    fn store() -> Arc<SecureStore> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(SecureStore::open(dir.into_path(), [6u8; 32]).unwrap())
    }

    async fn seeded_group(registry: &FakeRegistry, commitment: [u8; 32]) -> [u8; 32] {
        let secret = [1u8; 32];
        let group_id = crate::primitives::sha256(&secret);
        registry.create_group(group_id, commitment).await.unwrap();
        group_id
    }

    #[tokio::test]
    async fn double_attestation_is_rejected_by_ledger() {
        let registry = Arc::new(FakeRegistry::new());
        let identity = Identity {
            private_scalar: [11u8; 32],
            commitment: [22u8; 32],
            seed: vec![11u8; 32],
        };
        let group_id = seeded_group(&registry, identity.commitment).await;
        let service = AttestationService::new(registry.clone(), store());

        let content_id = to_hex(&[1u8; 32]);
        let first = service.attest(&content_id, group_id, &identity, 0).await.unwrap();
        assert_eq!(first.new_count, 1);

        let second = service.attest(&content_id, group_id, &identity, 1).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn different_content_allows_new_attestation() {
        let registry = Arc::new(FakeRegistry::new());
        let identity = Identity {
            private_scalar: [11u8; 32],
            commitment: [22u8; 32],
            seed: vec![11u8; 32],
        };
        let group_id = seeded_group(&registry, identity.commitment).await;
        let service = AttestationService::new(registry.clone(), store());

        let content_a = to_hex(&[1u8; 32]);
        let content_b = to_hex(&[2u8; 32]);
        service.attest(&content_a, group_id, &identity, 0).await.unwrap();
        let result = service.attest(&content_b, group_id, &identity, 1).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn non_member_identity_cannot_attest() {
        let registry = Arc::new(FakeRegistry::new());
        let member_identity = Identity {
            private_scalar: [1u8; 32],
            commitment: [2u8; 32],
            seed: vec![1u8; 32],
        };
        let group_id = seeded_group(&registry, member_identity.commitment).await;
        let service = AttestationService::new(registry, store());

        let non_member = Identity {
            private_scalar: [99u8; 32],
            commitment: [98u8; 32],
            seed: vec![99u8; 32],
        };
        let content_id = to_hex(&[3u8; 32]);
        let result = service.attest(&content_id, group_id, &non_member, 0).await;
        assert!(result.is_err());
    }
}
