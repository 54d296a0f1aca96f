//! Group creation, joining, and invite encoding.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Result, WitnessError};
use crate::external::Registry;
use crate::identity::Identity;
use crate::keyvault::KeyVault;
use crate::primitives::{from_hex, random_bytes, sha256, to_hex};
use crate::secure_store::SecureStore;

const GROUP_SECRETS_KEY: &str = "group_secrets";
const INVITE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredGroup {
    pub group_id: [u8; 32],
    pub secret: [u8; 32],
    pub name: String,
    pub is_creator: bool,
    pub created_at_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInvite {
    pub version: u32,
    pub group_id: String,
    pub group_secret: String,
    pub group_name: String,
    pub chain_id: u64,
    pub registry_address: String,
}

pub struct GroupService {
    registry: Arc<dyn Registry>,
    store: Arc<SecureStore>,
}

impl GroupService {
    pub fn new(registry: Arc<dyn Registry>, store: Arc<SecureStore>) -> Self {
        Self { registry, store }
    }

    fn groups(&self) -> Result<std::collections::HashMap<String, StoredGroup>> {
        Ok(self.store.get(GROUP_SECRETS_KEY)?.unwrap_or_default())
    }

    pub async fn create(&self, name: &str, identity: &Identity, now_ms: u64) -> Result<(String, String)> {
        let secret = random_bytes::<32>();
        let group_id = KeyVault::derive_group_id(&secret);
        let tx_hash = self
            .registry
            .create_group(group_id, identity.commitment)
            .await?;
        self.registry.wait_for_confirmation(&tx_hash).await?;

        self.store
            .update::<std::collections::HashMap<String, StoredGroup>, _>(
                GROUP_SECRETS_KEY,
                Default::default(),
                |groups| {
                    groups.insert(
                        to_hex(&group_id),
                        StoredGroup {
                            group_id,
                            secret,
                            name: name.to_string(),
                            is_creator: true,
                            created_at_ms: now_ms,
                        },
                    );
                },
            )?;

        Ok((to_hex(&group_id), tx_hash))
    }

    pub async fn join(
        &self,
        invite: &GroupInvite,
        identity: &Identity,
        chain_id: u64,
        registry_address: &str,
        caller_address: &str,
        now_ms: u64,
    ) -> Result<String> {
        if invite.chain_id != chain_id {
            return Err(WitnessError::UserInput("invite is for a different chain".into()));
        }
        if invite.registry_address != registry_address {
            return Err(WitnessError::UserInput(
                "invite is for a different registry contract".into(),
            ));
        }

        let secret: [u8; 32] = from_hex(&invite.group_secret)?
            .try_into()
            .map_err(|_| WitnessError::UserInput("group secret must be 32 bytes".into()))?;
        let group_id: [u8; 32] = from_hex(&invite.group_id)?
            .try_into()
            .map_err(|_| WitnessError::UserInput("group id must be 32 bytes".into()))?;
        if sha256(&secret) != group_id {
            return Err(WitnessError::UserInput(
                "group secret does not match group id".into(),
            ));
        }

        let group = self
            .registry
            .group(&group_id)
            .await?
            .ok_or_else(|| WitnessError::UserInput("group does not exist".into()))?;
        if !group.active {
            return Err(WitnessError::UserInput("group is not active".into()));
        }
        if self.registry.group_members(&group_id, caller_address).await? {
            return Err(WitnessError::State(
                "caller is already a member of this group".into(),
            ));
        }

        let tx_hash = self
            .registry
            .join_group(group_id, identity.commitment)
            .await?;
        self.registry.wait_for_confirmation(&tx_hash).await?;

        self.store
            .update::<std::collections::HashMap<String, StoredGroup>, _>(
                GROUP_SECRETS_KEY,
                Default::default(),
                |groups| {
                    groups.insert(
                        invite.group_id.clone(),
                        StoredGroup {
                            group_id,
                            secret,
                            name: invite.group_name.clone(),
                            is_creator: false,
                            created_at_ms: now_ms,
                        },
                    );
                },
            )?;

        Ok(tx_hash)
    }

    pub fn export_invite(
        &self,
        group_id: &str,
        chain_id: u64,
        registry_address: &str,
    ) -> Result<GroupInvite> {
        let groups = self.groups()?;
        let group = groups
            .get(group_id)
            .ok_or_else(|| WitnessError::UserInput("unknown group".into()))?;
        Ok(GroupInvite {
            version: INVITE_VERSION,
            group_id: to_hex(&group.group_id),
            group_secret: to_hex(&group.secret),
            group_name: group.name.clone(),
            chain_id,
            registry_address: registry_address.to_string(),
        })
    }

    pub fn parse_invite(payload: &str) -> Result<GroupInvite> {
        let invite: GroupInvite = serde_json::from_str(payload)?;
        if invite.version != INVITE_VERSION {
            return Err(WitnessError::UserInput(format!(
                "unsupported invite version: {}",
                invite.version
            )));
        }
        Ok(invite)
    }

    pub fn secret_for(&self, group_id: &str) -> Result<Option<[u8; 32]>> {
        Ok(self.groups()?.get(group_id).map(|g| g.secret))
    }
}
