//! Authorization façade.
//!
//! One [`Engine`] instance holds the full authorization state for one
//! principal: the sub-agent registry and permission store, the spending
//! ledgers, and the session-credential validator. Administrative mutations
//! are restricted to the configured principal; authorization checks and
//! queries are open to any caller.
//!
//! Execution and signature verification stay outside: the engine speaks to
//! them through the [`Executor`] and [`SignaturePolicy`] traits and only
//! acts on their results.

use std::sync::Arc;

use alloy_primitives::{Address, Selector, B256, U256};
use chrono::Utc;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::decoder::{self, SafeCall};
use crate::error::{Error, Result};
use crate::events::{self, EngineEvent};
use crate::permissions::{CallPermission, PermissionStore, SubAgentConfig};
use crate::session::{self, SessionGrant, SessionValidator};
use crate::spending::{self, SpendingLimit, SpendingLimiter};
use crate::{ANY_SELECTOR, NATIVE_TOKEN};

/// Verifies a signature over a signable message against the account's
/// signing policy. The engine builds the message; what counts as a valid
/// signature (single key, threshold scheme) is this collaborator's business.
pub trait SignaturePolicy {
    fn verify(&self, message: B256, signature: &[u8]) -> std::result::Result<(), String>;
}

/// Carries out calls and reports token balances.
///
/// `balance_of` with [`NATIVE_TOKEN`] reports the native-asset balance.
pub trait Executor {
    fn execute(&mut self, call: &SafeCall) -> std::result::Result<(), String>;
    fn balance_of(&self, token: Address, holder: Address) -> U256;
}

/// Time source for validity windows and budget windows.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn unix_now(&self) -> u64;
}

/// Wall-clock time.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_now(&self) -> u64 {
        Utc::now().timestamp().max(0) as u64
    }
}

/// Two-valued authorization outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Deny,
}

impl Decision {
    /// Wire encoding: 0 approves, 1 denies.
    pub fn code(&self) -> u8 {
        match self {
            Decision::Approve => 0,
            Decision::Deny => 1,
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Decision::Approve)
    }
}

/// Builder for [`Engine`].
#[derive(Debug, Default)]
pub struct EngineBuilder {
    config: Option<EngineConfig>,
    clock: Option<Arc<dyn Clock>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let config = match self.config {
            Some(config) => config,
            None => return Err(Error::Config("engine configuration is required".to_string())),
        };
        config.validate()?;
        Ok(Engine {
            config,
            permissions: PermissionStore::new(),
            spending: SpendingLimiter::new(),
            sessions: SessionValidator::new(),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        })
    }
}

/// Delegated-authorization engine for one principal identity.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    permissions: PermissionStore,
    spending: SpendingLimiter,
    sessions: SessionValidator,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        EngineBuilder::new().with_config(config).build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn require_principal(&self, caller: Address) -> Result<()> {
        if caller != self.config.principal {
            return Err(Error::CallerNotAuthorized { caller });
        }
        Ok(())
    }

    // ========================================================================
    // Sub-Agent Administration
    // ========================================================================

    /// Register a new sub-agent with no grants and no budget.
    pub fn create_sub_agent(&mut self, caller: Address, agent: Address) -> Result<()> {
        self.require_principal(caller)?;
        self.permissions.register(agent, self.clock.unix_now())?;
        info!(agent = %agent, "sub-agent created");
        events::emit(EngineEvent::SubAgentCreated { agent });
        Ok(())
    }

    /// Register a new sub-agent together with its initial permissions and
    /// budget. Fails without side effects if the agent already exists or a
    /// budget is already configured under its address.
    pub fn create_sub_agent_with_grants(
        &mut self,
        caller: Address,
        agent: Address,
        grants: &[CallPermission],
        allowed: U256,
        interval: u64,
    ) -> Result<()> {
        self.require_principal(caller)?;
        if self.spending.limit(agent).is_some() {
            return Err(Error::BudgetAlreadyConfigured(agent));
        }
        self.permissions.register(agent, self.clock.unix_now())?;
        for grant in grants {
            self.permissions.grant(agent, *grant)?;
        }
        self.spending.set_limit(agent, allowed, interval)?;

        info!(agent = %agent, grants = grants.len(), "sub-agent created with grants");
        events::emit(EngineEvent::SubAgentCreated { agent });
        events::emit(EngineEvent::PermissionsGranted {
            agent,
            count: grants.len(),
        });
        events::emit(EngineEvent::SpendingLimitSet {
            agent,
            allowed,
            interval,
        });
        Ok(())
    }

    /// Activate or deactivate a sub-agent. Deactivation suspends every
    /// check without disturbing grants or budget.
    pub fn set_active(&mut self, caller: Address, agent: Address, active: bool) -> Result<()> {
        self.require_principal(caller)?;
        self.permissions.set_active(agent, active)?;
        events::emit(EngineEvent::SubAgentActivation { agent, active });
        Ok(())
    }

    // ========================================================================
    // Permission Administration
    // ========================================================================

    pub fn grant_permissions(
        &mut self,
        caller: Address,
        agent: Address,
        grants: &[CallPermission],
    ) -> Result<()> {
        self.require_principal(caller)?;
        for grant in grants {
            self.permissions.grant(agent, *grant)?;
        }
        events::emit(EngineEvent::PermissionsGranted {
            agent,
            count: grants.len(),
        });
        Ok(())
    }

    pub fn revoke_permission(
        &mut self,
        caller: Address,
        agent: Address,
        permission: CallPermission,
    ) -> Result<()> {
        self.require_principal(caller)?;
        self.permissions.revoke_one(agent, permission)?;
        events::emit(EngineEvent::PermissionRevoked { agent });
        Ok(())
    }

    /// Revoke every grant of one agent. Returns the agent's new generation.
    pub fn revoke_agent_permissions(&mut self, caller: Address, agent: Address) -> Result<u64> {
        self.require_principal(caller)?;
        let epoch = self.permissions.revoke_all_for(agent)?;
        info!(agent = %agent, epoch, "all permissions revoked for agent");
        events::emit(EngineEvent::AgentPermissionsRevoked { agent, epoch });
        Ok(epoch)
    }

    /// Revoke every grant of every agent. Returns the new global generation.
    pub fn revoke_all_permissions(&mut self, caller: Address) -> Result<u64> {
        self.require_principal(caller)?;
        let epoch = self.permissions.revoke_all_global();
        info!(epoch, "all permissions revoked globally");
        events::emit(EngineEvent::AllPermissionsRevoked { epoch });
        Ok(epoch)
    }

    // ========================================================================
    // Budget Administration
    // ========================================================================

    /// One-time budget initialization for a registered agent.
    pub fn set_spending_limit(
        &mut self,
        caller: Address,
        agent: Address,
        allowed: U256,
        interval: u64,
    ) -> Result<()> {
        self.require_principal(caller)?;
        if !self.permissions.contains(agent) {
            return Err(Error::UnknownSubAgent(agent));
        }
        self.spending.set_limit(agent, allowed, interval)?;
        events::emit(EngineEvent::SpendingLimitSet {
            agent,
            allowed,
            interval,
        });
        Ok(())
    }

    pub fn update_spending_allowed(
        &mut self,
        caller: Address,
        agent: Address,
        allowed: U256,
    ) -> Result<()> {
        self.require_principal(caller)?;
        if !self.permissions.contains(agent) {
            return Err(Error::UnknownSubAgent(agent));
        }
        self.spending.update_allowed(agent, allowed);
        events::emit(EngineEvent::SpendingLimitUpdated { agent, allowed });
        Ok(())
    }

    pub fn update_spending_interval(
        &mut self,
        caller: Address,
        agent: Address,
        interval: u64,
    ) -> Result<()> {
        self.require_principal(caller)?;
        if !self.permissions.contains(agent) {
            return Err(Error::UnknownSubAgent(agent));
        }
        self.spending
            .update_interval(agent, interval, self.clock.unix_now());
        events::emit(EngineEvent::SpendingIntervalUpdated { agent, interval });
        Ok(())
    }

    // ========================================================================
    // Session Administration
    // ========================================================================

    /// Revoke one session credential by digest.
    pub fn revoke_session(&mut self, caller: Address, digest: B256) -> Result<()> {
        self.require_principal(caller)?;
        self.sessions.revoke(digest);
        events::emit(EngineEvent::SessionRevoked { digest });
        Ok(())
    }

    /// Revoke one session credential by its fields. Returns the revoked
    /// digest.
    pub fn revoke_session_grant(&mut self, caller: Address, grant: &SessionGrant) -> Result<B256> {
        self.require_principal(caller)?;
        let digest = self.sessions.revoke_grant(grant);
        events::emit(EngineEvent::SessionRevoked { digest });
        Ok(digest)
    }

    /// Invalidate every outstanding session credential. Returns the new
    /// generation.
    pub fn revoke_all_sessions(&mut self, caller: Address) -> Result<u64> {
        self.require_principal(caller)?;
        let epoch = self.sessions.revoke_all();
        info!(epoch, "all session credentials revoked");
        events::emit(EngineEvent::AllSessionsRevoked { epoch });
        Ok(epoch)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Whether an agent may make this exact call. Unknown and inactive
    /// agents answer false rather than failing.
    pub fn is_call_allowed(&self, agent: Address, target: Address, selector: Selector) -> bool {
        self.permissions
            .is_call_allowed(agent, target, selector)
            .unwrap_or(false)
    }

    pub fn sub_agent(&self, agent: Address) -> Option<&SubAgentConfig> {
        self.permissions.get(agent)
    }

    pub fn spending_limit(&self, agent: Address) -> Option<&SpendingLimit> {
        self.spending.limit(agent)
    }

    pub fn session_used(&self, digest: B256, token: Address) -> U256 {
        self.spending.session_used(digest, token)
    }

    pub fn is_session_revoked(&self, digest: B256) -> bool {
        self.sessions.is_revoked(digest)
    }

    pub fn permission_epoch(&self) -> u64 {
        self.permissions.global_epoch()
    }

    pub fn session_epoch(&self) -> u64 {
        self.sessions.epoch()
    }

    /// Structured digest of a grant under the current session generation.
    pub fn credential_digest(&self, grant: &SessionGrant) -> B256 {
        self.sessions.credential_digest(grant)
    }

    /// The exact message an external signer must sign to authorize a grant.
    pub fn signable_message(&self, grant: &SessionGrant) -> B256 {
        let domain = session::domain_separator(self.config.chain_id, self.config.account);
        session::signable_message(domain, self.credential_digest(grant))
    }

    // ========================================================================
    // Authorization
    // ========================================================================

    /// Authorize one incoming operation for a direct sub-agent, consuming
    /// budget on approval.
    ///
    /// The payload is decoded into its atomic calls; every call must pass
    /// the permission check, and the batch's summed native value must fit
    /// the agent's budget. Denial at any step leaves all counters untouched.
    /// Payloads without recognized framing are treated as one direct call
    /// described by the `target` and `value` arguments.
    pub fn authorize_operation(
        &mut self,
        agent: Address,
        target: Address,
        value: U256,
        payload: &[u8],
    ) -> Result<()> {
        let mut batch = decoder::decode_operation(payload);
        // An unframed payload carries its coordinates in the transport
        // parameters, not in the payload itself.
        if !decoder::is_framed(payload) {
            if let Some(call) = batch.calls.first_mut() {
                call.to = target;
                call.value = value;
            }
        }

        match self.permissions.get(agent) {
            Some(config) if config.active => {}
            Some(_) => return Err(Error::SubAgentInactive(agent)),
            None => return Err(Error::UnknownSubAgent(agent)),
        }

        if batch.calls.is_empty() {
            return Err(Error::PermissionDenied {
                agent,
                target: Address::ZERO,
                selector: ANY_SELECTOR,
            });
        }

        let mut total = U256::ZERO;
        for call in &batch.calls {
            if !self.permissions.is_call_allowed(agent, call.to, call.selector)? {
                return Err(Error::PermissionDenied {
                    agent,
                    target: call.to,
                    selector: call.selector,
                });
            }
            total = match total.checked_add(call.value) {
                Some(total) => total,
                None => {
                    return Err(Error::BudgetExceeded {
                        token: NATIVE_TOKEN,
                    })
                }
            };
        }

        self.spending
            .check_and_consume(agent, total, self.clock.unix_now())?;
        Ok(())
    }

    /// [`authorize_operation`](Self::authorize_operation) folded to the
    /// two-valued wire outcome, with the decision reported as an event.
    pub fn validate_operation(
        &mut self,
        agent: Address,
        target: Address,
        value: U256,
        payload: &[u8],
    ) -> Decision {
        match self.authorize_operation(agent, target, value, payload) {
            Ok(()) => {
                debug!(agent = %agent, "operation approved");
                events::emit(EngineEvent::OperationValidated {
                    agent,
                    approved: true,
                    reason: None,
                });
                Decision::Approve
            }
            Err(e) => {
                debug!(agent = %agent, error = %e, "operation denied");
                events::emit(EngineEvent::OperationValidated {
                    agent,
                    approved: false,
                    reason: Some(e.name().to_string()),
                });
                Decision::Deny
            }
        }
    }

    /// Run the full session-credential path: verify the signature over the
    /// grant's signable message, validate the grant, execute the call, then
    /// charge observed balance deltas against the grant's caps.
    ///
    /// Fully-unrestricted grants skip balance snapshots and charging. On
    /// success returns the credential digest the spend was charged to.
    ///
    /// The engine's own counters are only committed after every check
    /// passes, but the executor's effects are outside its reach: when this
    /// returns an error after execution, the caller must discard those
    /// effects.
    pub fn execute_with_session<P, E>(
        &mut self,
        policy: &P,
        executor: &mut E,
        grant: &SessionGrant,
        value: U256,
        payload: &[u8],
        signature: &[u8],
    ) -> Result<B256>
    where
        P: SignaturePolicy + ?Sized,
        E: Executor + ?Sized,
    {
        let digest = self.sessions.credential_digest(grant);
        let domain = session::domain_separator(self.config.chain_id, self.config.account);
        let message = session::signable_message(domain, digest);
        policy
            .verify(message, signature)
            .map_err(Error::SignatureInvalid)?;

        let now = self.clock.unix_now();
        self.sessions.validate(grant, digest, payload, now)?;

        let call = SafeCall {
            to: grant.target,
            value,
            selector: decoder::leading_selector(payload),
            data: payload.to_vec(),
        };

        if spending::is_unrestricted(&grant.limits) {
            executor.execute(&call).map_err(Error::ExecutionFailed)?;
            info!(digest = %digest, target = %grant.target, "unrestricted session executed");
            events::emit(EngineEvent::SessionExecuted {
                digest,
                target: grant.target,
                value,
            });
            return Ok(digest);
        }

        let before: Vec<U256> = grant
            .limits
            .iter()
            .map(|limit| executor.balance_of(limit.token, self.config.account))
            .collect();

        executor.execute(&call).map_err(Error::ExecutionFailed)?;

        let mut spends = Vec::with_capacity(grant.limits.len());
        for (limit, before) in grant.limits.iter().zip(before) {
            let after = executor.balance_of(limit.token, self.config.account);
            // A balance that grew is zero consumption, not an underflow.
            spends.push((limit.token, before.saturating_sub(after)));
        }
        self.spending.charge_session(digest, &grant.limits, &spends)?;

        info!(digest = %digest, target = %grant.target, "session executed");
        events::emit(EngineEvent::SessionExecuted {
            digest,
            target: grant.target,
            value,
        });
        Ok(digest)
    }
}
