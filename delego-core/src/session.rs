//! Session-credential validation.
//!
//! A session grant is a time-boxed credential authorized by an external
//! signature rather than a standing registry entry. Its identity is a
//! structured digest over every field of the grant plus the validator's
//! current nonce generation, built with standard typed-data hashing
//! ([EIP-712]) so that off-chain wallet tooling can produce the signature.
//!
//! Because the generation is part of the digest, bumping it changes the
//! digest of every outstanding grant at once: old signatures no longer match
//! any digest the validator will derive, which mass-revokes them without
//! enumerating the revocation set.
//!
//! [EIP-712]: https://eips.ethereum.org/EIPS/eip-712

use std::collections::HashSet;

use alloy_primitives::{keccak256, Address, Selector, B256, U256};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::spending::Limit;
use crate::{ANY_SELECTOR, DOMAIN_NAME, DOMAIN_VERSION};

const DOMAIN_TYPE: &[u8] =
    b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

// Nested struct types are appended after the primary type, per the
// typed-data encoding rules.
const SESSION_GRANT_TYPE: &[u8] =
    b"SessionGrant(address signer,uint256 validAfter,uint256 validUntil,Limit[] limits,\
address target,bytes4 selector,uint256 epoch)Limit(address token,uint256 amount)";

const LIMIT_TYPE: &[u8] = b"Limit(address token,uint256 amount)";

/// A time-boxed, signature-authorized credential.
///
/// The digest derived from these fields is the credential's identity:
/// change any field, including the order of `limits`, and you have a
/// different credential requiring a different signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionGrant {
    /// Key expected to have signed the credential.
    pub signer: Address,
    /// Unix seconds; the grant is unusable strictly before this.
    pub valid_after: u64,
    /// Unix seconds; the grant is unusable strictly after this.
    pub valid_until: u64,
    /// Per-token spending caps, in the canonical order fixed at signing
    /// time.
    pub limits: Vec<Limit>,
    /// Call target this grant is bound to.
    pub target: Address,
    /// Function this grant is bound to; the zero selector binds to any
    /// function.
    pub selector: Selector,
}

/// Revocation state and digest derivation for session grants.
#[derive(Debug, Clone)]
pub struct SessionValidator {
    revoked: HashSet<B256>,
    epoch: u64,
}

impl Default for SessionValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionValidator {
    pub fn new() -> Self {
        Self {
            revoked: HashSet::new(),
            epoch: 1,
        }
    }

    // ========================================================================
    // Digest Derivation
    // ========================================================================

    /// Structured hash of a grant under the current nonce generation.
    pub fn credential_digest(&self, grant: &SessionGrant) -> B256 {
        let mut buf = Vec::with_capacity(32 * 8);
        buf.extend_from_slice(keccak256(SESSION_GRANT_TYPE).as_slice());
        buf.extend_from_slice(&address_word(grant.signer));
        buf.extend_from_slice(&U256::from(grant.valid_after).to_be_bytes::<32>());
        buf.extend_from_slice(&U256::from(grant.valid_until).to_be_bytes::<32>());
        buf.extend_from_slice(hash_limits(&grant.limits).as_slice());
        buf.extend_from_slice(&address_word(grant.target));
        buf.extend_from_slice(&selector_word(grant.selector));
        buf.extend_from_slice(&U256::from(self.epoch).to_be_bytes::<32>());
        keccak256(buf)
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Check a grant's standing at time `now` against the call payload it is
    /// about to authorize.
    ///
    /// Order: revocation, then the validity window, then selector binding.
    /// A non-wildcard selector is only compared when the payload actually
    /// carries one (length of at least 4).
    pub fn validate(
        &self,
        grant: &SessionGrant,
        digest: B256,
        payload: &[u8],
        now: u64,
    ) -> Result<()> {
        if self.revoked.contains(&digest) {
            return Err(Error::SessionRevoked(digest));
        }
        if now < grant.valid_after {
            return Err(Error::SessionNotYetValid {
                valid_after: grant.valid_after,
                now,
            });
        }
        if now > grant.valid_until {
            return Err(Error::SessionExpired {
                valid_until: grant.valid_until,
                now,
            });
        }
        if grant.selector != ANY_SELECTOR && payload.len() >= 4 {
            let actual = Selector::from_slice(&payload[..4]);
            if actual != grant.selector {
                return Err(Error::SelectorMismatch {
                    expected: grant.selector,
                    actual,
                });
            }
        }
        Ok(())
    }

    // ========================================================================
    // Revocation
    // ========================================================================

    /// Revoke one credential by digest.
    pub fn revoke(&mut self, digest: B256) {
        self.revoked.insert(digest);
    }

    /// Revoke one credential by its fields, deriving the digest under the
    /// current generation.
    pub fn revoke_grant(&mut self, grant: &SessionGrant) -> B256 {
        let digest = self.credential_digest(grant);
        self.revoked.insert(digest);
        digest
    }

    /// Invalidate every outstanding grant by bumping the nonce generation.
    /// Returns the new generation.
    pub fn revoke_all(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    pub fn is_revoked(&self, digest: B256) -> bool {
        self.revoked.contains(&digest)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Typed-data domain separator binding signatures to one deployment: name,
/// version, chain, and the validating account's address.
pub fn domain_separator(chain_id: u64, verifying_account: Address) -> B256 {
    let mut buf = Vec::with_capacity(32 * 5);
    buf.extend_from_slice(keccak256(DOMAIN_TYPE).as_slice());
    buf.extend_from_slice(keccak256(DOMAIN_NAME.as_bytes()).as_slice());
    buf.extend_from_slice(keccak256(DOMAIN_VERSION.as_bytes()).as_slice());
    buf.extend_from_slice(&U256::from(chain_id).to_be_bytes::<32>());
    buf.extend_from_slice(&address_word(verifying_account));
    keccak256(buf)
}

/// Final signable message in the `\x19\x01` typed-data form.
pub fn signable_message(domain: B256, struct_hash: B256) -> B256 {
    let mut buf = Vec::with_capacity(2 + 32 + 32);
    buf.extend_from_slice(&[0x19, 0x01]);
    buf.extend_from_slice(domain.as_slice());
    buf.extend_from_slice(struct_hash.as_slice());
    keccak256(buf)
}

fn hash_limits(limits: &[Limit]) -> B256 {
    let mut buf = Vec::with_capacity(32 * limits.len());
    for limit in limits {
        buf.extend_from_slice(hash_limit(limit).as_slice());
    }
    keccak256(buf)
}

fn hash_limit(limit: &Limit) -> B256 {
    let mut buf = Vec::with_capacity(32 * 3);
    buf.extend_from_slice(keccak256(LIMIT_TYPE).as_slice());
    buf.extend_from_slice(&address_word(limit.token));
    buf.extend_from_slice(&limit.amount.to_be_bytes::<32>());
    keccak256(buf)
}

fn address_word(addr: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(addr.as_slice());
    word
}

// bytesN values are left-aligned in their word.
fn selector_word(selector: Selector) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[..4].copy_from_slice(selector.as_slice());
    word
}
