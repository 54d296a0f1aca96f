//! Trait-based boundaries to services this crate does not own: the
//! user's signing provider, the on-chain registry, and the object store
//! backing chunk/manifest uploads. Each has an in-memory fake used by
//! this crate's own test suite.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Result, WitnessError};

/// A typed-data domain message a signer is asked to sign. Mirrors
/// EIP-712 `eth_signTypedData_v4` without depending on a specific chain
/// library at this boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedMessage {
    pub domain_name: String,
    pub domain_version: String,
    pub chain_id: u64,
    pub primary_type: String,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait SigningProvider: Send + Sync {
    async fn address(&self) -> Result<String>;
    /// Returns a 65-byte `r || s || v` ECDSA signature over `message`.
    async fn sign_typed_data(&self, message: &TypedMessage) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupInfo {
    pub creator: String,
    pub created_at: u64,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentInfo {
    pub merkle_root: [u8; 32],
    pub manifest_cid: String,
    pub uploader: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionInfo {
    pub creator: String,
    pub merkle_root: [u8; 32],
    pub manifest_cid: String,
    pub chunk_count: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZkProof {
    pub merkle_tree_depth: u32,
    pub merkle_tree_root: [u8; 32],
    pub nullifier: [u8; 32],
    pub message: [u8; 32],
    pub scope: [u8; 32],
    pub points: [[u8; 32]; 8],
}

/// Read/write surface of the on-ledger registry. Every mutating call
/// returns once the submission is accepted; confirmation is awaited by
/// the caller via `wait_for_confirmation`.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn registered(&self, addr: &str) -> Result<bool>;
    async fn register(&self, addr: &str) -> Result<String>;

    async fn group(&self, group_id: &[u8; 32]) -> Result<Option<GroupInfo>>;
    async fn group_members(&self, group_id: &[u8; 32], addr: &str) -> Result<bool>;
    async fn create_group(&self, group_id: [u8; 32], identity_commitment: [u8; 32]) -> Result<String>;
    async fn join_group(&self, group_id: [u8; 32], identity_commitment: [u8; 32]) -> Result<String>;
    async fn semaphore_group_id(&self, group_id: &[u8; 32]) -> Result<u64>;
    async fn group_members_list(&self, group_id: &[u8; 32]) -> Result<Vec<[u8; 32]>>;
    async fn group_membership_root(&self, group_id: &[u8; 32]) -> Result<[u8; 32]>;

    async fn content(&self, content_id: &[u8; 32]) -> Result<Option<ContentInfo>>;
    async fn user_content(&self, addr: &str) -> Result<Vec<[u8; 32]>>;
    async fn group_content(&self, group_id: &[u8; 32]) -> Result<Vec<[u8; 32]>>;
    async fn content_groups(&self, content_id: &[u8; 32]) -> Result<Vec<[u8; 32]>>;
    async fn commit_content(
        &self,
        content_id: [u8; 32],
        merkle_root: [u8; 32],
        manifest_cid: String,
        group_ids: Vec<[u8; 32]>,
    ) -> Result<String>;

    async fn session(&self, session_id: &[u8; 32]) -> Result<Option<SessionInfo>>;
    async fn update_session(
        &self,
        session_id: [u8; 32],
        merkle_root: [u8; 32],
        manifest_cid: String,
        chunk_count: u64,
        group_ids: Vec<[u8; 32]>,
    ) -> Result<String>;

    async fn attestation_count(&self, content_id: &[u8; 32]) -> Result<u64>;
    async fn nullifier_used(&self, nullifier: &[u8; 32]) -> Result<bool>;
    async fn attest_to_content(
        &self,
        content_id: [u8; 32],
        group_id: [u8; 32],
        proof: ZkProof,
    ) -> Result<String>;

    async fn wait_for_confirmation(&self, tx_hash: &str) -> Result<()>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, filename: &str) -> Result<String>;
    async fn upload_json(&self, value: serde_json::Value) -> Result<String>;
    async fn fetch(&self, cid: &str) -> Result<Vec<u8>>;
}

// -- in-memory test doubles -------------------------------------------------

pub struct FakeSigningProvider {
    pub address: String,
    pub signing_key: k256::ecdsa::SigningKey,
}

impl FakeSigningProvider {
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        let signing_key = k256::ecdsa::SigningKey::from_bytes(
            &crate::primitives::sha256(address.as_bytes()).into(),
        )
        .expect("valid scalar");
        Self {
            address,
            signing_key,
        }
    }
}

fn fake_address(seed: &str) -> String {
    format!("0x{}", hex::encode(&crate::primitives::sha256(seed.as_bytes())[..20]))
}

impl Default for FakeSigningProvider {
    fn default() -> Self {
        let address = fake_address("default-signer");
        Self::new(address)
    }
}

#[async_trait]
impl SigningProvider for FakeSigningProvider {
    async fn address(&self) -> Result<String> {
        Ok(self.address.clone())
    }

    async fn sign_typed_data(&self, message: &TypedMessage) -> Result<Vec<u8>> {
        use k256::ecdsa::signature::Signer;
        let digest = crate::primitives::sha256(
            serde_json::to_string(message)
                .map_err(WitnessError::Serialization)?
                .as_bytes(),
        );
        let sig: k256::ecdsa::Signature = self.signing_key.sign(&digest);
        let mut out = sig.to_bytes().to_vec();
        out.push(27);
        Ok(out)
    }
}

#[derive(Default)]
struct RegistryState {
    registered: std::collections::HashSet<String>,
    groups: HashMap<[u8; 32], GroupInfo>,
    group_members: HashMap<[u8; 32], Vec<(String, [u8; 32])>>,
    content: HashMap<[u8; 32], ContentInfo>,
    content_groups: HashMap<[u8; 32], Vec<[u8; 32]>>,
    user_content: HashMap<String, Vec<[u8; 32]>>,
    group_content: HashMap<[u8; 32], Vec<[u8; 32]>>,
    sessions: HashMap<[u8; 32], SessionInfo>,
    attestation_counts: HashMap<[u8; 32], u64>,
    used_nullifiers: std::collections::HashSet<[u8; 32]>,
    next_tx: u64,
}

pub struct FakeRegistry {
    state: Mutex<RegistryState>,
}

impl Default for FakeRegistry {
    fn default() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
        }
    }
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_tx_hash(state: &mut RegistryState) -> String {
        state.next_tx += 1;
        format!("0xtx{:064x}", state.next_tx)
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn registered(&self, addr: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().registered.contains(addr))
    }

    async fn register(&self, addr: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.registered.insert(addr.to_string());
        Ok(Self::next_tx_hash(&mut state))
    }

    async fn group(&self, group_id: &[u8; 32]) -> Result<Option<GroupInfo>> {
        Ok(self.state.lock().unwrap().groups.get(group_id).cloned())
    }

    async fn group_members(&self, group_id: &[u8; 32], addr: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state
            .group_members
            .get(group_id)
            .map(|members| members.iter().any(|(a, _)| a == addr))
            .unwrap_or(false))
    }

    async fn create_group(&self, group_id: [u8; 32], identity_commitment: [u8; 32]) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.groups.contains_key(&group_id) {
            return Err(WitnessError::State("group already exists".into()));
        }
        state.groups.insert(
            group_id,
            GroupInfo {
                creator: "creator".into(),
                created_at: 0,
                active: true,
            },
        );
        state
            .group_members
            .entry(group_id)
            .or_default()
            .push(("creator".into(), identity_commitment));
        Ok(Self::next_tx_hash(&mut state))
    }

    async fn join_group(&self, group_id: [u8; 32], identity_commitment: [u8; 32]) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if !state.groups.contains_key(&group_id) {
            return Err(WitnessError::UserInput("group does not exist".into()));
        }
        state
            .group_members
            .entry(group_id)
            .or_default()
            .push(("member".into(), identity_commitment));
        Ok(Self::next_tx_hash(&mut state))
    }

    async fn semaphore_group_id(&self, _group_id: &[u8; 32]) -> Result<u64> {
        Ok(1)
    }

    async fn group_members_list(&self, group_id: &[u8; 32]) -> Result<Vec<[u8; 32]>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .group_members
            .get(group_id)
            .map(|members| members.iter().map(|(_, c)| *c).collect())
            .unwrap_or_default())
    }

    async fn group_membership_root(&self, group_id: &[u8; 32]) -> Result<[u8; 32]> {
        let members = self.group_members_list(group_id).await?;
        let mut tree = crate::merkle::MerkleTree::new();
        for m in members {
            tree.insert(m);
        }
        Ok(tree.root().unwrap_or([0u8; 32]))
    }

    async fn content(&self, content_id: &[u8; 32]) -> Result<Option<ContentInfo>> {
        Ok(self.state.lock().unwrap().content.get(content_id).cloned())
    }

    async fn user_content(&self, addr: &str) -> Result<Vec<[u8; 32]>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .user_content
            .get(addr)
            .cloned()
            .unwrap_or_default())
    }

    async fn group_content(&self, group_id: &[u8; 32]) -> Result<Vec<[u8; 32]>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .group_content
            .get(group_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn content_groups(&self, content_id: &[u8; 32]) -> Result<Vec<[u8; 32]>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .content_groups
            .get(content_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn commit_content(
        &self,
        content_id: [u8; 32],
        merkle_root: [u8; 32],
        manifest_cid: String,
        group_ids: Vec<[u8; 32]>,
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.content.insert(
            content_id,
            ContentInfo {
                merkle_root,
                manifest_cid,
                uploader: "uploader".into(),
                timestamp: 0,
            },
        );
        state.content_groups.insert(content_id, group_ids.clone());
        for g in group_ids {
            state.group_content.entry(g).or_default().push(content_id);
        }
        Ok(Self::next_tx_hash(&mut state))
    }

    async fn session(&self, session_id: &[u8; 32]) -> Result<Option<SessionInfo>> {
        Ok(self.state.lock().unwrap().sessions.get(session_id).cloned())
    }

    async fn update_session(
        &self,
        session_id: [u8; 32],
        merkle_root: [u8; 32],
        manifest_cid: String,
        chunk_count: u64,
        group_ids: Vec<[u8; 32]>,
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let entry = state.sessions.entry(session_id).or_insert(SessionInfo {
            creator: "creator".into(),
            merkle_root,
            manifest_cid: manifest_cid.clone(),
            chunk_count,
            created_at: 0,
            updated_at: 0,
        });
        entry.merkle_root = merkle_root;
        entry.manifest_cid = manifest_cid;
        entry.chunk_count = chunk_count;
        entry.updated_at += 1;
        for g in group_ids {
            state
                .content_groups
                .entry(session_id)
                .or_default()
                .push(g);
        }
        Ok(Self::next_tx_hash(&mut state))
    }

    async fn attestation_count(&self, content_id: &[u8; 32]) -> Result<u64> {
        Ok(*self
            .state
            .lock()
            .unwrap()
            .attestation_counts
            .get(content_id)
            .unwrap_or(&0))
    }

    async fn nullifier_used(&self, nullifier: &[u8; 32]) -> Result<bool> {
        Ok(self.state.lock().unwrap().used_nullifiers.contains(nullifier))
    }

    async fn attest_to_content(
        &self,
        content_id: [u8; 32],
        _group_id: [u8; 32],
        proof: ZkProof,
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.used_nullifiers.contains(&proof.nullifier) {
            return Err(WitnessError::UserInput("nullifier used".into()));
        }
        state.used_nullifiers.insert(proof.nullifier);
        *state.attestation_counts.entry(content_id).or_insert(0) += 1;
        Ok(Self::next_tx_hash(&mut state))
    }

    async fn wait_for_confirmation(&self, _tx_hash: &str) -> Result<()> {
        Ok(())
    }
}

pub struct FakeObjectStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl Default for FakeObjectStore {
    fn default() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
        }
    }
}

impl FakeObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn upload(&self, bytes: Vec<u8>, filename: &str) -> Result<String> {
        let cid = format!("cid:{}", hex::encode(crate::primitives::sha256(&bytes)));
        log::debug!("uploaded {filename} as {cid} ({} bytes)", bytes.len());
        self.blobs.lock().unwrap().insert(cid.clone(), bytes);
        Ok(cid)
    }

    async fn upload_json(&self, value: serde_json::Value) -> Result<String> {
        let bytes = serde_json::to_vec(&value).map_err(WitnessError::Serialization)?;
        self.upload(bytes, "manifest.json").await
    }

    async fn fetch(&self, cid: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap()
            .get(cid)
            .cloned()
            .ok_or_else(|| WitnessError::Transport(format!("unknown cid: {cid}")))
    }
}
