//! Structured engine events.
//!
//! Every administrative mutation and authorization decision emits one event
//! through a process-wide sink. Events are observational: embedders index
//! them, nothing in the engine reads them back. When no sink is installed,
//! emission is a no-op.

use std::sync::{Arc, RwLock};

use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything the engine reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    SubAgentCreated {
        agent: Address,
    },
    SubAgentActivation {
        agent: Address,
        active: bool,
    },
    PermissionsGranted {
        agent: Address,
        count: usize,
    },
    PermissionRevoked {
        agent: Address,
    },
    AgentPermissionsRevoked {
        agent: Address,
        epoch: u64,
    },
    AllPermissionsRevoked {
        epoch: u64,
    },
    SpendingLimitSet {
        agent: Address,
        allowed: U256,
        interval: u64,
    },
    SpendingLimitUpdated {
        agent: Address,
        allowed: U256,
    },
    SpendingIntervalUpdated {
        agent: Address,
        interval: u64,
    },
    SpendingWindowReset {
        agent: Address,
    },
    OperationValidated {
        agent: Address,
        approved: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    SessionExecuted {
        digest: B256,
        target: Address,
        value: U256,
    },
    SessionRevoked {
        digest: B256,
    },
    AllSessionsRevoked {
        epoch: u64,
    },
    /// Balance movement vocabulary for embedders that manage custody; the
    /// engine itself never moves balances.
    Deposited {
        agent: Address,
        token: Address,
        amount: U256,
    },
    Withdrawn {
        agent: Address,
        token: Address,
        amount: U256,
    },
}

/// One emitted event with its envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique event id, `evt_` plus a time-ordered UUID.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: EngineEvent,
}

impl EventRecord {
    pub fn new(event: EngineEvent) -> Self {
        Self {
            id: format!("evt_{}", uuid::Uuid::now_v7().simple()),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Destination for emitted events.
pub trait EventSink: Send + Sync + std::fmt::Debug {
    fn record(&self, record: &EventRecord);
}

/// Writes each event as one JSON line on stdout.
#[derive(Debug, Clone, Default)]
pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn record(&self, record: &EventRecord) {
        if let Ok(json) = serde_json::to_string(record) {
            println!("{}", json);
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Default)]
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn record(&self, _record: &EventRecord) {}
}

static GLOBAL_SINK: RwLock<Option<Arc<dyn EventSink>>> = RwLock::new(None);

/// Install the process-wide sink. Replaces any previous sink.
pub fn set_global_sink(sink: Arc<dyn EventSink>) {
    *GLOBAL_SINK.write().unwrap() = Some(sink);
}

/// Emit one event through the global sink, if any.
pub fn emit(event: EngineEvent) {
    if let Ok(guard) = GLOBAL_SINK.read() {
        if let Some(sink) = guard.as_ref() {
            sink.record(&EventRecord::new(event));
        }
    }
}
