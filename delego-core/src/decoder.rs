//! Batched-call decoding.
//!
//! An incoming operation payload hides the list of atomic calls it actually
//! represents behind up to two layers of framing: an outer
//! `execute(address,uint256,bytes,uint8)` wrapper and, for batches, a nested
//! `multiSend(bytes)` region packing fixed-layout records back-to-back with no
//! separators.
//!
//! Top-level dispatch never fails: unrecognized or too-short payloads decode
//! to an empty call plan, which the engine denies downstream. Trailing garbage
//! inside a packed batch is dropped, not rejected; [`DecodedBatch::truncated`]
//! tells a well-formed empty batch apart from one that was cut short.

use alloy_primitives::{Address, Selector, U256};
use alloy_sol_types::{sol, SolCall};
use tracing::warn;

use crate::ANY_SELECTOR;

sol! {
    /// Outer single-operation framing.
    function execute(address to, uint256 value, bytes data, uint8 operation);

    /// Nested packed-batch framing.
    function multiSend(bytes transactions);
}

/// Operation flag for a plain call record.
pub const OP_CALL: u8 = 0;

/// Operation flag selecting delegate dispatch; with a non-zero target this
/// marks the inner payload as a nested batch.
pub const OP_DELEGATE: u8 = 1;

/// One atomic call recovered from an operation payload.
///
/// Ephemeral: produced and consumed within a single authorization pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeCall {
    /// Call target address.
    pub to: Address,
    /// Native value carried by the call.
    pub value: U256,
    /// Leading 4 bytes of `data`; the zero selector when `data` is shorter
    /// than 4 bytes. The zero selector doubles as the "any function" wildcard
    /// in permission checks, so short payloads match wildcard grants.
    pub selector: Selector,
    /// Full call payload, selector included.
    pub data: Vec<u8>,
}

/// Ordered result of decoding one operation payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedBatch {
    /// The atomic calls, in submission order.
    pub calls: Vec<SafeCall>,
    /// True when a packed record ran past the end of the buffer and parsing
    /// stopped early. Already-parsed records are kept.
    pub truncated: bool,
}

impl DecodedBatch {
    /// True when the payload decoded to no calls at all.
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Decode a top-level operation payload into its atomic calls.
///
/// Payloads shorter than 4 bytes decode to an empty plan. Payloads that do
/// not carry the `execute` framing fall through to a defensive single-call
/// form: the first 4 bytes become the selector, the remainder the payload,
/// and target/value are zero-filled because the decoder cannot know them.
pub fn decode_operation(payload: &[u8]) -> DecodedBatch {
    if payload.len() < 4 {
        return DecodedBatch::default();
    }
    if payload[..4] == executeCall::SELECTOR {
        return decode_execute(payload);
    }
    DecodedBatch {
        calls: vec![SafeCall {
            to: Address::ZERO,
            value: U256::ZERO,
            selector: Selector::from_slice(&payload[..4]),
            data: payload[4..].to_vec(),
        }],
        truncated: false,
    }
}

/// True when the payload starts with the recognized `execute` framing.
///
/// The engine uses this to tell the defensive single-call fallback apart from
/// a framed operation, since the fallback's coordinates come from the
/// transport rather than the payload.
pub fn is_framed(payload: &[u8]) -> bool {
    payload.len() >= 4 && payload[..4] == executeCall::SELECTOR
}

fn decode_execute(payload: &[u8]) -> DecodedBatch {
    let call = match executeCall::abi_decode(payload, true) {
        Ok(call) => call,
        Err(_) => return DecodedBatch::default(),
    };
    if call.operation == OP_DELEGATE && call.to != Address::ZERO {
        return decode_multi_send_region(&call.data);
    }
    let data = call.data.to_vec();
    DecodedBatch {
        calls: vec![SafeCall {
            to: call.to,
            value: call.value,
            selector: leading_selector(&data),
            data,
        }],
        truncated: false,
    }
}

fn decode_multi_send_region(data: &[u8]) -> DecodedBatch {
    if data.len() < 4 || data[..4] != multiSendCall::SELECTOR {
        return DecodedBatch::default();
    }
    let call = match multiSendCall::abi_decode(data, true) {
        Ok(call) => call,
        Err(_) => return DecodedBatch::default(),
    };
    parse_packed_records(&call.transactions)
}

/// Parse a packed record region: `u8 operation ‖ 20-byte target ‖ 32-byte
/// value ‖ 32-byte data length ‖ data`, repeated with no separators.
///
/// A record whose declared length (or any field) runs past the buffer ends
/// parsing early; earlier records are kept and the result is marked
/// truncated.
fn parse_packed_records(bytes: &[u8]) -> DecodedBatch {
    let mut calls = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        match read_record(bytes, &mut i) {
            Ok(call) => calls.push(call),
            Err(Truncated) => {
                warn!(
                    parsed = calls.len(),
                    remaining = bytes.len() - i,
                    "packed batch truncated mid-record, dropping trailing bytes"
                );
                return DecodedBatch {
                    calls,
                    truncated: true,
                };
            }
        }
    }

    DecodedBatch {
        calls,
        truncated: false,
    }
}

struct Truncated;

fn read_record(bytes: &[u8], i: &mut usize) -> Result<SafeCall, Truncated> {
    let _operation = read_u8(bytes, i)?;
    let to = read_address(bytes, i)?;
    let value = read_u256(bytes, i)?;
    let declared = read_u256(bytes, i)?;
    let data_len = usize::try_from(declared).map_err(|_| Truncated)?;
    let data = read_bytes(bytes, i, data_len)?.to_vec();
    Ok(SafeCall {
        to,
        value,
        selector: leading_selector(&data),
        data,
    })
}

fn read_u8(bytes: &[u8], i: &mut usize) -> Result<u8, Truncated> {
    if bytes.len() <= *i {
        return Err(Truncated);
    }
    let b = bytes[*i];
    *i += 1;
    Ok(b)
}

fn read_address(bytes: &[u8], i: &mut usize) -> Result<Address, Truncated> {
    if bytes.len() < *i + 20 {
        return Err(Truncated);
    }
    let addr = Address::from_slice(&bytes[*i..*i + 20]);
    *i += 20;
    Ok(addr)
}

fn read_u256(bytes: &[u8], i: &mut usize) -> Result<U256, Truncated> {
    if bytes.len() < *i + 32 {
        return Err(Truncated);
    }
    let word = &bytes[*i..*i + 32];
    *i += 32;
    Ok(U256::from_be_slice(word))
}

fn read_bytes<'a>(bytes: &'a [u8], i: &mut usize, len: usize) -> Result<&'a [u8], Truncated> {
    // `len` is an untrusted declared length and may be near usize::MAX;
    // checking it against the remaining bytes avoids the overflowing
    // `*i + len`.
    if len > bytes.len() - *i {
        return Err(Truncated);
    }
    let out = &bytes[*i..*i + len];
    *i += len;
    Ok(out)
}

/// Leading 4 bytes of a payload as a selector; the zero selector when the
/// payload is shorter than 4 bytes.
pub fn leading_selector(data: &[u8]) -> Selector {
    if data.len() < 4 {
        return ANY_SELECTOR;
    }
    Selector::from_slice(&data[..4])
}

/// Encode a single operation in the outer `execute` framing.
pub fn encode_execute(to: Address, value: U256, data: Vec<u8>, operation: u8) -> Vec<u8> {
    executeCall {
        to,
        value,
        data: data.into(),
        operation,
    }
    .abi_encode()
}

/// Pack calls into the nested `multiSend` framing.
///
/// The result is the inner payload for [`encode_execute`] with
/// [`OP_DELEGATE`] and a non-zero batch target.
pub fn encode_multi_send(calls: &[SafeCall]) -> Vec<u8> {
    let mut packed = Vec::new();
    for call in calls {
        packed.push(OP_CALL);
        packed.extend_from_slice(call.to.as_slice());
        packed.extend_from_slice(&call.value.to_be_bytes::<32>());
        packed.extend_from_slice(&U256::from(call.data.len()).to_be_bytes::<32>());
        packed.extend_from_slice(&call.data);
    }
    multiSendCall {
        transactions: packed.into(),
    }
    .abi_encode()
}
