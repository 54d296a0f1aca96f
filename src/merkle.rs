//! Incremental Merkle tree over composite chunk leaves.
//!
//! The pair hash is plain unsorted concatenation, `SHA256(left || right)`,
//! matching the on-ledger anchor. Do not sort siblings here — a sorted-pair
//! variant diverges from the anchored root and is not used by this tree.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WitnessError};
use crate::primitives::sha256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Position {
    Left,
    Right,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sibling {
    pub hash: [u8; 32],
    pub position: Position,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf: [u8; 32],
    pub index: usize,
    pub siblings: Vec<Sibling>,
    pub root: [u8; 32],
}

/// Composite leaf: `index(4) || plaintext_hash(32) || encrypted_hash(32) || captured_at_ms(8)`.
pub fn compute_leaf(
    index: u32,
    plaintext_hash: &[u8; 32],
    encrypted_hash: &[u8; 32],
    captured_at_ms: u64,
) -> [u8; 32] {
    let mut buf = Vec::with_capacity(4 + 32 + 32 + 8);
    buf.extend_from_slice(&index.to_be_bytes());
    buf.extend_from_slice(plaintext_hash);
    buf.extend_from_slice(encrypted_hash);
    buf.extend_from_slice(&captured_at_ms.to_be_bytes());
    sha256(&buf)
}

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    sha256(&buf)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MerkleTree {
    leaves: Vec<[u8; 32]>,
}

impl MerkleTree {
    pub fn new() -> Self {
        Self { leaves: Vec::new() }
    }

    pub fn restore(leaves: Vec<[u8; 32]>) -> Self {
        Self { leaves }
    }

    pub fn insert(&mut self, leaf: [u8; 32]) {
        self.leaves.push(leaf);
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn leaves(&self) -> &[[u8; 32]] {
        &self.leaves
    }

    fn layers(&self) -> Vec<Vec<[u8; 32]>> {
        let mut layers = vec![self.leaves.clone()];
        while layers.last().unwrap().len() > 1 {
            let current = layers.last().unwrap();
            let mut next = Vec::with_capacity((current.len() + 1) / 2);
            let mut i = 0;
            while i < current.len() {
                let left = &current[i];
                let right = if i + 1 < current.len() {
                    &current[i + 1]
                } else {
                    left
                };
                next.push(hash_pair(left, right));
                i += 2;
            }
            layers.push(next);
        }
        layers
    }

    pub fn root(&self) -> Option<[u8; 32]> {
        if self.leaves.is_empty() {
            return None;
        }
        self.layers().last().unwrap().first().copied()
    }

    pub fn proof(&self, index: usize) -> Result<MerkleProof> {
        if index >= self.leaves.len() {
            return Err(WitnessError::State(format!(
                "leaf index {index} out of range (tree has {} leaves)",
                self.leaves.len()
            )));
        }
        let layers = self.layers();
        let root = *layers.last().unwrap().first().unwrap();
        let mut siblings = Vec::new();
        let mut idx = index;
        for layer in &layers[..layers.len() - 1] {
            let is_left = idx % 2 == 0;
            let sibling_idx = if is_left { idx + 1 } else { idx - 1 };
            let sibling_idx = if sibling_idx < layer.len() {
                sibling_idx
            } else {
                idx
            };
            siblings.push(Sibling {
                hash: layer[sibling_idx],
                position: if is_left {
                    Position::Right
                } else {
                    Position::Left
                },
            });
            idx /= 2;
        }
        Ok(MerkleProof {
            leaf: self.leaves[index],
            index,
            siblings,
            root,
        })
    }
}

pub fn verify_proof(proof: &MerkleProof) -> bool {
    let mut current = proof.leaf;
    for sibling in &proof.siblings {
        current = match sibling.position {
            Position::Right => hash_pair(&current, &sibling.hash),
            Position::Left => hash_pair(&sibling.hash, &current),
        };
    }
    current == proof.root
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::random_bytes;

    fn make_leaves(n: usize) -> Vec<[u8; 32]> {
        (0..n)
            .map(|i| compute_leaf(i as u32, &random_bytes::<32>(), &random_bytes::<32>(), 1000 + i as u64))
            .collect()
    }

    #[test]
    fn single_leaf_root_equals_leaf() {
        let mut tree = MerkleTree::new();
        let leaf = compute_leaf(0, &[1u8; 32], &[2u8; 32], 1);
        tree.insert(leaf);
        assert_eq!(tree.root().unwrap(), leaf);
    }

    #[test]
    fn empty_tree_has_no_root() {
        let tree = MerkleTree::new();
        assert!(tree.root().is_none());
    }

    #[test]
    fn restore_reproduces_root() {
        let leaves = make_leaves(5);
        let mut tree = MerkleTree::new();
        for leaf in &leaves {
            tree.insert(*leaf);
        }
        let root = tree.root().unwrap();
        let restored = MerkleTree::restore(leaves);
        assert_eq!(restored.root().unwrap(), root);
    }

    #[test]
    fn proof_verifies_for_every_index() {
        for n in [1usize, 2, 3, 4, 5, 7, 8, 16] {
            let leaves = make_leaves(n);
            let mut tree = MerkleTree::new();
            for leaf in &leaves {
                tree.insert(*leaf);
            }
            for i in 0..n {
                let proof = tree.proof(i).unwrap();
                assert!(verify_proof(&proof), "proof failed for n={n} i={i}");
            }
        }
    }

    #[test]
    fn tampered_sibling_fails_verification() {
        let leaves = make_leaves(4);
        let mut tree = MerkleTree::new();
        for leaf in &leaves {
            tree.insert(*leaf);
        }
        let mut proof = tree.proof(1).unwrap();
        proof.siblings[0].hash[0] ^= 0xFF;
        assert!(!verify_proof(&proof));
    }

    #[test]
    fn odd_width_duplicates_trailing_node() {
        let leaves = make_leaves(3);
        let mut tree = MerkleTree::new();
        for leaf in &leaves {
            tree.insert(*leaf);
        }
        let expected_level1_2 = hash_pair(&leaves[2], &leaves[2]);
        let level1_0 = hash_pair(&leaves[0], &leaves[1]);
        let expected_root = hash_pair(&level1_0, &expected_level1_2);
        assert_eq!(tree.root().unwrap(), expected_root);
    }

    #[test]
    fn out_of_range_proof_errors() {
        let mut tree = MerkleTree::new();
        tree.insert(compute_leaf(0, &[0u8; 32], &[0u8; 32], 0));
        assert!(tree.proof(5).is_err());
    }

    proptest::proptest! {
        #[test]
        fn proof_verifies_for_any_tree_and_index(n in 1usize..64, seed in 0u64..10_000) {
            let leaves: Vec<[u8; 32]> = (0..n)
                .map(|i| compute_leaf(i as u32, &sha256(&(seed + i as u64).to_be_bytes()), &sha256(&(seed * 7 + i as u64).to_be_bytes()), 1000 + i as u64))
                .collect();
            let mut tree = MerkleTree::new();
            for leaf in &leaves {
                tree.insert(*leaf);
            }
            for i in 0..n {
                let proof = tree.proof(i).unwrap();
                proptest::prop_assert!(verify_proof(&proof));
            }
        }

        #[test]
        fn tampering_any_sibling_byte_breaks_verification(n in 2usize..32, tamper_index in 0usize..2000) {
            let leaves: Vec<[u8; 32]> = (0..n)
                .map(|i| compute_leaf(i as u32, &[i as u8; 32], &[i as u8 + 1; 32], 1000 + i as u64))
                .collect();
            let mut tree = MerkleTree::new();
            for leaf in &leaves {
                tree.insert(*leaf);
            }
            let target = tamper_index % n;
            let mut proof = tree.proof(target).unwrap();
            if let Some(first) = proof.siblings.first_mut() {
                first.hash[0] ^= 0xFF;
                proptest::prop_assert!(!verify_proof(&proof));
            }
        }

        #[test]
        fn restore_after_serialization_reproduces_root(n in 1usize..64, seed in 0u64..10_000) {
            let leaves: Vec<[u8; 32]> = (0..n)
                .map(|i| compute_leaf(i as u32, &sha256(&(seed + i as u64).to_be_bytes()), &sha256(&(seed * 3 + i as u64).to_be_bytes()), 1000 + i as u64))
                .collect();
            let mut tree = MerkleTree::new();
            for leaf in &leaves {
                tree.insert(*leaf);
            }
            let root = tree.root().unwrap();
            let serialized = serde_json::to_vec(&tree).unwrap();
            let reloaded: MerkleTree = serde_json::from_slice(&serialized).unwrap();
            proptest::prop_assert_eq!(reloaded.root(), Some(root));
        }
    }
}
