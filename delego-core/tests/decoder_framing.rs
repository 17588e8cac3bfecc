//! Batch framing end to end: nested encodings through `decode_operation`,
//! and how the engine treats batches that truncate mid-record.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use alloy_primitives::{Address, Selector, U256};
use delego_core::decoder::{
    decode_operation, encode_execute, encode_multi_send, SafeCall, OP_DELEGATE,
};
use delego_core::{CallPermission, Clock, Decision, Engine, EngineConfig, ANY_SELECTOR};

const NOW: u64 = 1_700_000_000;

const PRINCIPAL: Address = Address::repeat_byte(0x51);
const ACCOUNT: Address = Address::repeat_byte(0xac);
const BATCH_TARGET: Address = Address::repeat_byte(0xba);

#[derive(Debug)]
struct ManualClock(AtomicU64);

impl Clock for ManualClock {
    fn unix_now(&self) -> u64 {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

fn call(to: Address, value: u64, data: Vec<u8>) -> SafeCall {
    let selector = if data.len() >= 4 {
        Selector::new([data[0], data[1], data[2], data[3]])
    } else {
        ANY_SELECTOR
    };
    SafeCall {
        to,
        value: U256::from(value),
        selector,
        data,
    }
}

/// Nested framing for a batch: `execute(batch_target, 0, multiSend(packed),
/// delegate)`.
fn batch_payload(calls: &[SafeCall]) -> Vec<u8> {
    encode_execute(
        BATCH_TARGET,
        U256::ZERO,
        encode_multi_send(calls),
        OP_DELEGATE,
    )
}

/// Batch of `first` followed by an empty-data record whose declared data
/// length is corrupted to `declared`, overrunning the packed region.
fn overrunning_batch_payload(first: &SafeCall, declared: U256) -> Vec<u8> {
    let tail = call(Address::repeat_byte(0x22), 0, vec![]);
    let mut inner = encode_multi_send(&[first.clone(), tail]);

    // Packed layout per record: 1 op byte, 20 target bytes, a 32-byte value
    // word, a 32-byte data-length word, then the data itself. The packed
    // region starts after the inner selector and the offset and length words
    // of the ABI bytes argument.
    let first_record_len = 1 + 20 + 32 + 32 + first.data.len();
    let packed_start = 4 + 32 + 32;
    let tail_length_word = packed_start + first_record_len + 1 + 20 + 32;

    inner[tail_length_word..tail_length_word + 32]
        .copy_from_slice(&declared.to_be_bytes::<32>());

    encode_execute(BATCH_TARGET, U256::ZERO, inner, OP_DELEGATE)
}

// ============================================================================
// Nested Framing
// ============================================================================

#[test]
fn test_mixed_batch_survives_both_framing_layers() {
    let calls = vec![
        call(Address::repeat_byte(0x21), 7, vec![0xaa, 0xbb, 0xcc, 0xdd, 0x01]),
        call(Address::repeat_byte(0x22), 0, vec![]),
        call(Address::repeat_byte(0x23), 1, vec![0x0f, 0x0e]),
        call(Address::repeat_byte(0x24), 900, vec![0x11; 64]),
    ];

    let batch = decode_operation(&batch_payload(&calls));
    assert!(!batch.truncated);
    assert_eq!(batch.calls, calls);
    // Short payloads surface the wildcard selector.
    assert_eq!(batch.calls[1].selector, ANY_SELECTOR);
    assert_eq!(batch.calls[2].selector, ANY_SELECTOR);
}

// ============================================================================
// Truncation
// ============================================================================

#[test]
fn test_overrun_truncates_to_parsed_prefix() {
    let first = call(Address::repeat_byte(0x21), 7, vec![0xaa, 0xbb, 0xcc, 0xdd]);

    // Declares 10 data bytes where zero remain.
    let batch = decode_operation(&overrunning_batch_payload(&first, U256::from(10u64)));
    // Two records were declared; only the intact prefix survives, and the
    // result is marked so it cannot be mistaken for a well-formed batch.
    assert!(batch.truncated);
    assert_eq!(batch.calls, vec![first]);
}

#[test]
fn test_extreme_declared_length_truncates_through_framing() {
    let first = call(Address::repeat_byte(0x21), 7, vec![0xaa, 0xbb, 0xcc, 0xdd]);

    // A length word of u64::MAX behaves like any other overrun: the intact
    // prefix survives and the batch is marked, with no failure on the way.
    let batch = decode_operation(&overrunning_batch_payload(&first, U256::from(u64::MAX)));
    assert!(batch.truncated);
    assert_eq!(batch.calls, vec![first]);
}

#[test]
fn test_engine_decides_over_parsed_prefix_of_truncated_batch() {
    let granted = Address::repeat_byte(0x21);
    let first = call(granted, 7, vec![0xaa, 0xbb, 0xcc, 0xdd]);

    let mut engine = Engine::builder()
        .with_config(EngineConfig::new(PRINCIPAL, ACCOUNT, 1))
        .with_clock(Arc::new(ManualClock(AtomicU64::new(NOW))))
        .build()
        .unwrap();
    let agent = Address::repeat_byte(0xa1);
    engine
        .create_sub_agent_with_grants(
            PRINCIPAL,
            agent,
            &[CallPermission::AnySelector { target: granted }],
            U256::from(100u64),
            0,
        )
        .unwrap();

    // The overrunning tail record never parsed, so the decision covers only
    // the intact prefix. The tail's target was never granted anything.
    let decision = engine.validate_operation(
        agent,
        Address::ZERO,
        U256::ZERO,
        &overrunning_batch_payload(&first, U256::from(10u64)),
    );
    assert_eq!(decision, Decision::Approve);
    assert_eq!(engine.spending_limit(agent).unwrap().spent, U256::from(7u64));
}
