//! Sub-agent registry and call permissions.
//!
//! Permissions are stored as opaque digests rather than structured rows: each
//! grant hashes (agent, target, selector) together with the store's global
//! epoch and the agent's own epoch. Lookups re-derive the digest with the
//! *current* epochs, so bumping either epoch strands every digest written
//! under the old one. Mass revocation is a counter increment; nothing is
//! swept or garbage-collected.

use std::collections::{HashMap, HashSet};

use alloy_primitives::{keccak256, Address, Selector, B256, U256};

use crate::error::{Error, Result};
use crate::{ANY_SELECTOR, ANY_TARGET};

/// Registry entry for one sub-agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAgentConfig {
    /// Inactive agents keep their grants but fail every permission check.
    pub active: bool,
    /// Unix seconds at registration.
    pub created_at: u64,
    /// Per-agent key epoch. Starts at 1 and only grows.
    pub permission_epoch: u64,
}

/// One grantable call pattern.
///
/// Wildcards are encoded with sentinel values inside the permission digest,
/// so a wildcard grant is a single stored key, not an enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPermission {
    /// Exactly this selector on exactly this target.
    Exact { target: Address, selector: Selector },
    /// This selector on any target.
    AnyTarget { selector: Selector },
    /// Any function on this target.
    AnySelector { target: Address },
    /// Any function on any target.
    Any,
}

impl CallPermission {
    /// The (target, selector) pair stored in the digest, wildcards as
    /// sentinels.
    pub fn key_parts(&self) -> (Address, Selector) {
        match self {
            CallPermission::Exact { target, selector } => (*target, *selector),
            CallPermission::AnyTarget { selector } => (ANY_TARGET, *selector),
            CallPermission::AnySelector { target } => (*target, ANY_SELECTOR),
            CallPermission::Any => (ANY_TARGET, ANY_SELECTOR),
        }
    }
}

/// Derive the storage digest for one permission under the given epochs.
///
/// Five 32-byte words: agent and target left-padded to a word, the selector
/// occupying the first 4 bytes of its word, and both epochs as big-endian
/// words. Same layout at grant and lookup time, so equality of digests is
/// equality of (pattern, epochs).
pub fn derive_permission_key(
    agent: Address,
    target: Address,
    selector: Selector,
    global_epoch: u64,
    agent_epoch: u64,
) -> B256 {
    let mut buf = [0u8; 160];
    buf[12..32].copy_from_slice(agent.as_slice());
    buf[44..64].copy_from_slice(target.as_slice());
    buf[64..68].copy_from_slice(selector.as_slice());
    buf[96..128].copy_from_slice(&U256::from(global_epoch).to_be_bytes::<32>());
    buf[128..160].copy_from_slice(&U256::from(agent_epoch).to_be_bytes::<32>());
    keccak256(buf)
}

/// Permission store for all sub-agents of one principal.
#[derive(Debug, Clone)]
pub struct PermissionStore {
    allowed: HashSet<B256>,
    agents: HashMap<Address, SubAgentConfig>,
    global_epoch: u64,
}

impl Default for PermissionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionStore {
    pub fn new() -> Self {
        Self {
            allowed: HashSet::new(),
            agents: HashMap::new(),
            global_epoch: 1,
        }
    }

    // ========================================================================
    // Registry
    // ========================================================================

    /// Register a new sub-agent, active, with a fresh epoch.
    pub fn register(&mut self, agent: Address, now: u64) -> Result<()> {
        if self.agents.contains_key(&agent) {
            return Err(Error::SubAgentExists(agent));
        }
        self.agents.insert(
            agent,
            SubAgentConfig {
                active: true,
                created_at: now,
                permission_epoch: 1,
            },
        );
        Ok(())
    }

    /// Flip an agent's active flag. The agent must be registered.
    pub fn set_active(&mut self, agent: Address, active: bool) -> Result<()> {
        match self.agents.get_mut(&agent) {
            Some(config) => {
                config.active = active;
                Ok(())
            }
            None => Err(Error::UnknownSubAgent(agent)),
        }
    }

    pub fn get(&self, agent: Address) -> Option<&SubAgentConfig> {
        self.agents.get(&agent)
    }

    pub fn contains(&self, agent: Address) -> bool {
        self.agents.contains_key(&agent)
    }

    /// The agent's epoch, requiring the agent to be registered and active.
    fn active_epoch(&self, agent: Address) -> Result<u64> {
        match self.agents.get(&agent) {
            Some(config) if config.active => Ok(config.permission_epoch),
            Some(_) => Err(Error::SubAgentInactive(agent)),
            None => Err(Error::UnknownSubAgent(agent)),
        }
    }

    // ========================================================================
    // Grants
    // ========================================================================

    /// Grant one call pattern to an active agent.
    pub fn grant(&mut self, agent: Address, permission: CallPermission) -> Result<()> {
        let agent_epoch = self.active_epoch(agent)?;
        let (target, selector) = permission.key_parts();
        self.allowed.insert(derive_permission_key(
            agent,
            target,
            selector,
            self.global_epoch,
            agent_epoch,
        ));
        Ok(())
    }

    /// Remove one previously granted pattern. Removing a pattern that was
    /// never granted is a no-op. The agent must be registered; it may be
    /// inactive, so grants can be pruned while an agent is paused.
    pub fn revoke_one(&mut self, agent: Address, permission: CallPermission) -> Result<()> {
        let config = match self.agents.get(&agent) {
            Some(config) => config,
            None => return Err(Error::UnknownSubAgent(agent)),
        };
        let (target, selector) = permission.key_parts();
        self.allowed.remove(&derive_permission_key(
            agent,
            target,
            selector,
            self.global_epoch,
            config.permission_epoch,
        ));
        Ok(())
    }

    /// Strand every grant of one agent by bumping its epoch. Returns the new
    /// epoch. Other agents are untouched.
    pub fn revoke_all_for(&mut self, agent: Address) -> Result<u64> {
        match self.agents.get_mut(&agent) {
            Some(config) => {
                config.permission_epoch += 1;
                Ok(config.permission_epoch)
            }
            None => Err(Error::UnknownSubAgent(agent)),
        }
    }

    /// Strand every grant of every agent by bumping the global epoch.
    /// Returns the new epoch.
    pub fn revoke_all_global(&mut self) -> u64 {
        self.global_epoch += 1;
        self.global_epoch
    }

    pub fn global_epoch(&self) -> u64 {
        self.global_epoch
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Check whether an active agent may make this exact call.
    ///
    /// Probes wildcard forms before exact forms, so a broad grant answers
    /// without touching the specific digests: (any, any), then
    /// (target, any), then (any, selector), then (target, selector).
    pub fn is_call_allowed(
        &self,
        agent: Address,
        target: Address,
        selector: Selector,
    ) -> Result<bool> {
        let agent_epoch = self.active_epoch(agent)?;
        let probes = [
            (ANY_TARGET, ANY_SELECTOR),
            (target, ANY_SELECTOR),
            (ANY_TARGET, selector),
            (target, selector),
        ];
        for (probe_target, probe_selector) in probes {
            let key = derive_permission_key(
                agent,
                probe_target,
                probe_selector,
                self.global_epoch,
                agent_epoch,
            );
            if self.allowed.contains(&key) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
