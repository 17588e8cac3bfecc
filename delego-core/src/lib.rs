//! Delegated authorization for a principal identity and its sub-agents.
//!
//! A principal spawns two kinds of subordinate authority. **Sub-agents** are
//! standing, resource-limited identities: the principal grants them call
//! permissions (with target and selector wildcards) and a rolling-window
//! native-value budget, and can strand every grant at once by bumping a
//! revocation generation. **Session grants** are time-boxed credentials
//! authorized by an external signature over a typed-data digest, carrying
//! per-token spending caps charged from observed balance deltas.
//!
//! The crate covers the authorization decision path only:
//!
//! - [`decoder`]: unwraps batched-call framing into atomic calls
//! - [`permissions`]: the versioned allow-list with generation revocation
//! - [`spending`]: windowed budgets and per-credential token caps
//! - [`session`]: typed-data digests and credential validation
//! - [`engine`]: the façade orchestrating all of the above
//!
//! Execution, key custody, and signature cryptography stay outside, behind
//! the [`engine::Executor`] and [`engine::SignaturePolicy`] traits.
//!
//! # Quick Start
//!
//! ```
//! use alloy_primitives::{Address, U256};
//! use delego_core::config::EngineConfig;
//! use delego_core::engine::Engine;
//! use delego_core::permissions::CallPermission;
//!
//! let principal = Address::repeat_byte(0x51);
//! let config = EngineConfig::new(principal, Address::repeat_byte(0xac), 1);
//! let mut engine = Engine::new(config)?;
//!
//! // Spawn a sub-agent allowed to call one target, spending up to 1000 wei
//! // per day.
//! let agent = Address::repeat_byte(0xa1);
//! let venue = Address::repeat_byte(0x11);
//! engine.create_sub_agent_with_grants(
//!     principal,
//!     agent,
//!     &[CallPermission::AnySelector { target: venue }],
//!     U256::from(1_000u64),
//!     86_400,
//! )?;
//!
//! let decision = engine.validate_operation(
//!     agent,
//!     venue,
//!     U256::from(10u64),
//!     &[0xaa, 0xbb, 0xcc, 0xdd],
//! );
//! assert!(decision.is_approved());
//! # Ok::<(), delego_core::error::Error>(())
//! ```

use alloy_primitives::{Address, Selector, U256};

pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod events;
pub mod permissions;
pub mod session;
pub mod spending;

// Core engine surface
pub use config::EngineConfig;
pub use engine::{Clock, Decision, Engine, EngineBuilder, Executor, SignaturePolicy, SystemClock};
pub use error::{Error, Result};

// Authorization building blocks
pub use decoder::{DecodedBatch, SafeCall};
pub use permissions::{CallPermission, PermissionStore, SubAgentConfig};
pub use session::{SessionGrant, SessionValidator};
pub use spending::{Limit, SpendingLimit, SpendingLimiter};

// Observability
pub use events::{EngineEvent, EventRecord, EventSink, NoOpSink, StdoutSink};

/// Wildcard target address inside permission keys.
pub const ANY_TARGET: Address = Address::repeat_byte(0xff);

/// Wildcard token inside session limits. Same sentinel as [`ANY_TARGET`].
pub const ANY_TOKEN: Address = Address::repeat_byte(0xff);

/// Wildcard function selector: matches any function, and doubles as the
/// selector of payloads too short to carry one.
pub const ANY_SELECTOR: Selector = Selector::ZERO;

/// Budget sentinel disabling all tracking for the limit that carries it.
pub const UNLIMITED: U256 = U256::MAX;

/// Conventional pseudo-address for the native asset in balance queries and
/// budget errors.
pub const NATIVE_TOKEN: Address = Address::repeat_byte(0xee);

/// Typed-data domain name, bound into every session-grant signature.
pub const DOMAIN_NAME: &str = "Delego Session Grant";

/// Typed-data domain version.
pub const DOMAIN_VERSION: &str = "1";
