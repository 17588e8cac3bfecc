//! Error types for Delego.
//!
//! Every failure on the authorization path maps to a distinct variant so that
//! embedders and tests can tell causes apart. Decode failures are deliberately
//! absent: a malformed operation payload degrades to an empty call plan, which
//! the engine then denies as [`Error::PermissionDenied`].

use alloy_primitives::{Address, Selector, B256};
use thiserror::Error;

/// Result type alias for Delego operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Delego operations.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Administrative Errors
    // =========================================================================
    /// An administrative operation was invoked by anyone but the principal.
    #[error("caller {caller} is not the principal")]
    CallerNotAuthorized { caller: Address },

    // =========================================================================
    // Sub-Agent Lifecycle Errors
    // =========================================================================
    /// The sub-agent was never created.
    #[error("unknown sub-agent: {0}")]
    UnknownSubAgent(Address),

    /// The operation requires an active sub-agent, but it is deactivated.
    #[error("sub-agent {0} is deactivated")]
    SubAgentInactive(Address),

    /// A sub-agent with this address already exists.
    #[error("sub-agent {0} already exists")]
    SubAgentExists(Address),

    // =========================================================================
    // Permission & Budget Errors
    // =========================================================================
    /// No allow-list entry matches the call under the current revocation
    /// epochs. The zero address / zero selector here means the operation
    /// decoded to no calls at all.
    #[error("call to {target} (selector {selector}) not permitted for {agent}")]
    PermissionDenied {
        agent: Address,
        target: Address,
        selector: Selector,
    },

    /// A spending check (pre-flight or post-hoc) would exceed the configured
    /// ceiling. Carries the token whose limit was violated; the native-asset
    /// sentinel for direct value spend.
    #[error("spending limit exceeded for token {token}")]
    BudgetExceeded { token: Address },

    /// Attempt to initialize a spending limit that already exists.
    /// Changes must go through the explicit update operations.
    #[error("spending limit already configured for {0}")]
    BudgetAlreadyConfigured(Address),

    // =========================================================================
    // Session Credential Errors
    // =========================================================================
    /// The credential digest is in the revoked set.
    #[error("session credential {0} has been revoked")]
    SessionRevoked(B256),

    /// The credential's validity window has not opened yet.
    #[error("session credential not valid before {valid_after} (now {now})")]
    SessionNotYetValid { valid_after: u64, now: u64 },

    /// The credential's validity window has closed.
    #[error("session credential expired at {valid_until} (now {now})")]
    SessionExpired { valid_until: u64, now: u64 },

    /// The call's leading selector does not match the granted selector.
    #[error("call selector {actual} does not match granted selector {expected}")]
    SelectorMismatch { expected: Selector, actual: Selector },

    /// The signature-verification collaborator rejected the signable message.
    ///
    /// Mass session revocation also surfaces here: after the session epoch is
    /// bumped the recomputed message no longer matches what was signed.
    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),

    // =========================================================================
    // Execution & Configuration Errors
    // =========================================================================
    /// The external executor reported failure after authorization succeeded.
    /// The caller must discard any effects of the partial execution.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// Engine configuration was missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<crate::config::ConfigError> for Error {
    fn from(e: crate::config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

impl Error {
    /// Get the machine-readable error name (kebab-case).
    ///
    /// Stable labels for structured logs and event records.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CallerNotAuthorized { .. } => "caller-not-authorized",
            Self::UnknownSubAgent(_) => "unknown-sub-agent",
            Self::SubAgentInactive(_) => "sub-agent-inactive",
            Self::SubAgentExists(_) => "sub-agent-exists",
            Self::PermissionDenied { .. } => "permission-denied",
            Self::BudgetExceeded { .. } => "budget-exceeded",
            Self::BudgetAlreadyConfigured(_) => "budget-already-configured",
            Self::SessionRevoked(_) => "session-revoked",
            Self::SessionNotYetValid { .. } => "session-not-yet-valid",
            Self::SessionExpired { .. } => "session-expired",
            Self::SelectorMismatch { .. } => "selector-mismatch",
            Self::SignatureInvalid(_) => "signature-invalid",
            Self::ExecutionFailed(_) => "execution-failed",
            Self::Config(_) => "configuration-error",
        }
    }
}
