//! Spending budgets.
//!
//! Two ledgers live here. Sub-agents get one native-value budget each,
//! optionally refreshed on a rolling window: the first spend after the
//! window elapses resets the running total instead of accumulating. Session
//! credentials get per-token caps charged from observed balance deltas,
//! accumulated per credential digest across uses.
//!
//! Checks are check-then-commit: a denied spend leaves every counter exactly
//! as it was.

use std::collections::HashMap;

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::events::{self, EngineEvent};
use crate::{ANY_TOKEN, NATIVE_TOKEN, UNLIMITED};

/// Native-value budget for one sub-agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendingLimit {
    /// Budget ceiling. Zero denies everything; [`UNLIMITED`] disables
    /// tracking entirely.
    pub allowed: U256,
    /// Running total within the current window.
    pub spent: U256,
    /// Window length in seconds. Zero means the budget never refreshes.
    pub interval: u64,
    /// Unix seconds when the current window opened. Zero until the first
    /// spend.
    pub last_updated: u64,
}

/// One per-token cap inside a session credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    pub token: Address,
    pub amount: U256,
}

/// True for the designated "no limits" shape: a single entry covering any
/// token with an unlimited amount.
pub fn is_unrestricted(limits: &[Limit]) -> bool {
    limits.len() == 1 && limits[0].token == ANY_TOKEN && limits[0].amount == UNLIMITED
}

/// Budget ledgers for sub-agents and session credentials.
#[derive(Debug, Clone, Default)]
pub struct SpendingLimiter {
    limits: HashMap<Address, SpendingLimit>,
    used: HashMap<(B256, Address), U256>,
}

impl SpendingLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Sub-Agent Budgets
    // ========================================================================

    /// Configure an agent's budget. A budget can be set once; afterwards use
    /// the narrower update operations.
    pub fn set_limit(&mut self, agent: Address, allowed: U256, interval: u64) -> Result<()> {
        if self.limits.contains_key(&agent) {
            return Err(Error::BudgetAlreadyConfigured(agent));
        }
        self.limits.insert(
            agent,
            SpendingLimit {
                allowed,
                spent: U256::ZERO,
                interval,
                last_updated: 0,
            },
        );
        Ok(())
    }

    /// Replace the budget ceiling, creating a default entry if none exists.
    /// The running total and window are untouched.
    pub fn update_allowed(&mut self, agent: Address, allowed: U256) {
        self.limits.entry(agent).or_default().allowed = allowed;
    }

    /// Replace the window length and restart the window now. The running
    /// total is untouched.
    pub fn update_interval(&mut self, agent: Address, interval: u64, now: u64) {
        let limit = self.limits.entry(agent).or_default();
        limit.interval = interval;
        limit.last_updated = now;
    }

    pub fn limit(&self, agent: Address) -> Option<&SpendingLimit> {
        self.limits.get(&agent)
    }

    /// Check a native-value spend against the agent's budget and, if it
    /// fits, consume it.
    ///
    /// An agent with no configured budget has a ceiling of zero. An
    /// unlimited ceiling approves without touching state. When the window
    /// has elapsed the spend opens a fresh window instead of accumulating.
    pub fn check_and_consume(&mut self, agent: Address, value: U256, now: u64) -> Result<()> {
        let limit = match self.limits.get_mut(&agent) {
            Some(limit) => limit,
            None => {
                return Err(Error::BudgetExceeded {
                    token: NATIVE_TOKEN,
                })
            }
        };

        if limit.allowed == UNLIMITED {
            return Ok(());
        }
        if limit.allowed.is_zero() {
            return Err(Error::BudgetExceeded {
                token: NATIVE_TOKEN,
            });
        }

        let window_expired = limit.interval > 0
            && limit.last_updated > 0
            && now.saturating_sub(limit.last_updated) >= limit.interval;

        let new_total = if window_expired {
            value
        } else {
            match limit.spent.checked_add(value) {
                Some(total) => total,
                None => {
                    return Err(Error::BudgetExceeded {
                        token: NATIVE_TOKEN,
                    })
                }
            }
        };

        if new_total > limit.allowed {
            return Err(Error::BudgetExceeded {
                token: NATIVE_TOKEN,
            });
        }

        limit.spent = new_total;
        if window_expired || limit.last_updated == 0 {
            limit.last_updated = now;
        }
        if window_expired {
            events::emit(EngineEvent::SpendingWindowReset { agent });
        }
        Ok(())
    }

    // ========================================================================
    // Session Charges
    // ========================================================================

    /// Charge observed per-token spends against a credential's caps.
    ///
    /// All spends are staged and committed together, so a breach in any one
    /// token leaves the whole credential uncharged. A spend in a token the
    /// credential carries no cap for is a breach with a cap of zero.
    /// Unlimited caps are never tracked.
    pub fn charge_session(
        &mut self,
        digest: B256,
        limits: &[Limit],
        spends: &[(Address, U256)],
    ) -> Result<()> {
        let mut staged: HashMap<Address, U256> = HashMap::new();

        for (token, spend) in spends {
            if spend.is_zero() {
                continue;
            }
            let cap = limits
                .iter()
                .find(|limit| limit.token == *token)
                .map(|limit| limit.amount)
                .unwrap_or(U256::ZERO);
            if cap == UNLIMITED {
                continue;
            }
            let prior = match staged.get(token) {
                Some(total) => *total,
                None => self
                    .used
                    .get(&(digest, *token))
                    .copied()
                    .unwrap_or(U256::ZERO),
            };
            let new_total = match prior.checked_add(*spend) {
                Some(total) => total,
                None => return Err(Error::BudgetExceeded { token: *token }),
            };
            if new_total > cap {
                return Err(Error::BudgetExceeded { token: *token });
            }
            staged.insert(*token, new_total);
        }

        for (token, total) in staged {
            self.used.insert((digest, token), total);
        }
        Ok(())
    }

    /// Cumulative charged amount for one (credential, token) pair.
    pub fn session_used(&self, digest: B256, token: Address) -> U256 {
        self.used
            .get(&(digest, token))
            .copied()
            .unwrap_or(U256::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn expect_exceeded(res: Result<()>, token: Address) {
        match res {
            Err(Error::BudgetExceeded { token: t }) => assert_eq!(t, token),
            res => panic!("Expected BudgetExceeded, got {:?}", res),
        }
    }

    // ========================================================================
    // Budget Configuration
    // ========================================================================

    #[test]
    fn test_set_limit_once() {
        let mut limiter = SpendingLimiter::new();
        limiter
            .set_limit(addr(0xa1), U256::from(1000u64), 3600)
            .unwrap();

        let limit = limiter.limit(addr(0xa1)).unwrap();
        assert_eq!(limit.allowed, U256::from(1000u64));
        assert_eq!(limit.spent, U256::ZERO);
        assert_eq!(limit.interval, 3600);
        assert_eq!(limit.last_updated, 0);
    }

    #[test]
    fn test_set_limit_twice_rejected() {
        let mut limiter = SpendingLimiter::new();
        limiter.set_limit(addr(0xa1), U256::from(1000u64), 0).unwrap();
        match limiter.set_limit(addr(0xa1), U256::from(2000u64), 0) {
            Err(Error::BudgetAlreadyConfigured(agent)) => assert_eq!(agent, addr(0xa1)),
            res => panic!("Expected BudgetAlreadyConfigured, got {:?}", res),
        }
    }

    #[test]
    fn test_update_allowed_preserves_spent() {
        let mut limiter = SpendingLimiter::new();
        limiter.set_limit(addr(0xa1), U256::from(100u64), 0).unwrap();
        limiter
            .check_and_consume(addr(0xa1), U256::from(60u64), NOW)
            .unwrap();

        limiter.update_allowed(addr(0xa1), U256::from(50u64));
        let limit = limiter.limit(addr(0xa1)).unwrap();
        assert_eq!(limit.allowed, U256::from(50u64));
        assert_eq!(limit.spent, U256::from(60u64));

        // Already over the lowered ceiling.
        expect_exceeded(
            limiter.check_and_consume(addr(0xa1), U256::from(1u64), NOW),
            NATIVE_TOKEN,
        );
    }

    #[test]
    fn test_update_allowed_upserts_missing_entry() {
        let mut limiter = SpendingLimiter::new();
        limiter.update_allowed(addr(0xa1), U256::from(10u64));
        assert_eq!(limiter.limit(addr(0xa1)).unwrap().allowed, U256::from(10u64));
        assert_eq!(limiter.limit(addr(0xa1)).unwrap().interval, 0);
    }

    #[test]
    fn test_update_interval_restarts_window_keeps_spent() {
        let mut limiter = SpendingLimiter::new();
        limiter.set_limit(addr(0xa1), U256::from(100u64), 0).unwrap();
        limiter
            .check_and_consume(addr(0xa1), U256::from(40u64), NOW)
            .unwrap();

        limiter.update_interval(addr(0xa1), 60, NOW + 10);
        let limit = limiter.limit(addr(0xa1)).unwrap();
        assert_eq!(limit.interval, 60);
        assert_eq!(limit.last_updated, NOW + 10);
        assert_eq!(limit.spent, U256::from(40u64));
    }

    // ========================================================================
    // Check and Consume
    // ========================================================================

    #[test]
    fn test_no_budget_denies() {
        let mut limiter = SpendingLimiter::new();
        expect_exceeded(
            limiter.check_and_consume(addr(0xa1), U256::from(1u64), NOW),
            NATIVE_TOKEN,
        );
    }

    #[test]
    fn test_zero_ceiling_denies_even_zero_value() {
        let mut limiter = SpendingLimiter::new();
        limiter.set_limit(addr(0xa1), U256::ZERO, 0).unwrap();
        expect_exceeded(
            limiter.check_and_consume(addr(0xa1), U256::ZERO, NOW),
            NATIVE_TOKEN,
        );
    }

    #[test]
    fn test_unlimited_never_tracks() {
        let mut limiter = SpendingLimiter::new();
        limiter.set_limit(addr(0xa1), UNLIMITED, 0).unwrap();
        limiter
            .check_and_consume(addr(0xa1), U256::MAX, NOW)
            .unwrap();
        limiter
            .check_and_consume(addr(0xa1), U256::MAX, NOW)
            .unwrap();
        assert_eq!(limiter.limit(addr(0xa1)).unwrap().spent, U256::ZERO);
        assert_eq!(limiter.limit(addr(0xa1)).unwrap().last_updated, 0);
    }

    #[test]
    fn test_accumulates_up_to_ceiling() {
        let mut limiter = SpendingLimiter::new();
        limiter.set_limit(addr(0xa1), U256::from(100u64), 0).unwrap();

        limiter
            .check_and_consume(addr(0xa1), U256::from(60u64), NOW)
            .unwrap();
        limiter
            .check_and_consume(addr(0xa1), U256::from(40u64), NOW)
            .unwrap();
        assert_eq!(limiter.limit(addr(0xa1)).unwrap().spent, U256::from(100u64));

        expect_exceeded(
            limiter.check_and_consume(addr(0xa1), U256::from(1u64), NOW),
            NATIVE_TOKEN,
        );
    }

    #[test]
    fn test_denied_spend_leaves_counters_untouched() {
        let mut limiter = SpendingLimiter::new();
        limiter.set_limit(addr(0xa1), U256::from(100u64), 0).unwrap();
        limiter
            .check_and_consume(addr(0xa1), U256::from(60u64), NOW)
            .unwrap();

        expect_exceeded(
            limiter.check_and_consume(addr(0xa1), U256::from(50u64), NOW),
            NATIVE_TOKEN,
        );
        assert_eq!(limiter.limit(addr(0xa1)).unwrap().spent, U256::from(60u64));

        // The remaining headroom is still spendable.
        limiter
            .check_and_consume(addr(0xa1), U256::from(40u64), NOW)
            .unwrap();
    }

    #[test]
    fn test_overflowing_total_denies() {
        let mut limiter = SpendingLimiter::new();
        limiter
            .set_limit(addr(0xa1), U256::MAX - U256::from(1u64), 0)
            .unwrap();
        limiter
            .check_and_consume(addr(0xa1), U256::MAX - U256::from(1u64), NOW)
            .unwrap();
        expect_exceeded(
            limiter.check_and_consume(addr(0xa1), U256::from(2u64), NOW),
            NATIVE_TOKEN,
        );
    }

    #[test]
    fn test_first_spend_stamps_window_start() {
        let mut limiter = SpendingLimiter::new();
        limiter.set_limit(addr(0xa1), U256::from(100u64), 3600).unwrap();
        limiter
            .check_and_consume(addr(0xa1), U256::from(10u64), NOW)
            .unwrap();
        assert_eq!(limiter.limit(addr(0xa1)).unwrap().last_updated, NOW);
    }

    #[test]
    fn test_window_resets_running_total() {
        let mut limiter = SpendingLimiter::new();
        limiter.set_limit(addr(0xa1), U256::from(100u64), 3600).unwrap();
        limiter
            .check_and_consume(addr(0xa1), U256::from(100u64), NOW)
            .unwrap();

        // Window still open: budget exhausted.
        expect_exceeded(
            limiter.check_and_consume(addr(0xa1), U256::from(1u64), NOW + 3599),
            NATIVE_TOKEN,
        );

        // Window elapsed: the spend opens a fresh total.
        limiter
            .check_and_consume(addr(0xa1), U256::from(80u64), NOW + 3600)
            .unwrap();
        let limit = limiter.limit(addr(0xa1)).unwrap();
        assert_eq!(limit.spent, U256::from(80u64));
        assert_eq!(limit.last_updated, NOW + 3600);
    }

    #[test]
    fn test_zero_interval_never_resets() {
        let mut limiter = SpendingLimiter::new();
        limiter.set_limit(addr(0xa1), U256::from(100u64), 0).unwrap();
        limiter
            .check_and_consume(addr(0xa1), U256::from(100u64), NOW)
            .unwrap();
        expect_exceeded(
            limiter.check_and_consume(addr(0xa1), U256::from(1u64), NOW + 1_000_000),
            NATIVE_TOKEN,
        );
    }

    #[test]
    fn test_oversized_spend_denied_even_after_window_reset() {
        let mut limiter = SpendingLimiter::new();
        limiter.set_limit(addr(0xa1), U256::from(100u64), 60).unwrap();
        limiter
            .check_and_consume(addr(0xa1), U256::from(50u64), NOW)
            .unwrap();
        expect_exceeded(
            limiter.check_and_consume(addr(0xa1), U256::from(101u64), NOW + 120),
            NATIVE_TOKEN,
        );
        // The failed reset attempt must not have restarted the window.
        assert_eq!(limiter.limit(addr(0xa1)).unwrap().last_updated, NOW);
    }

    // ========================================================================
    // Session Charges
    // ========================================================================

    #[test]
    fn test_unrestricted_shape() {
        assert!(is_unrestricted(&[Limit {
            token: ANY_TOKEN,
            amount: UNLIMITED,
        }]));
        assert!(!is_unrestricted(&[Limit {
            token: ANY_TOKEN,
            amount: U256::from(10u64),
        }]));
        assert!(!is_unrestricted(&[Limit {
            token: addr(0x01),
            amount: UNLIMITED,
        }]));
        assert!(!is_unrestricted(&[
            Limit {
                token: ANY_TOKEN,
                amount: UNLIMITED,
            },
            Limit {
                token: addr(0x01),
                amount: U256::from(10u64),
            },
        ]));
        assert!(!is_unrestricted(&[]));
    }

    #[test]
    fn test_charge_accumulates_per_digest_and_token() {
        let mut limiter = SpendingLimiter::new();
        let digest = B256::repeat_byte(0x5e);
        let limits = [Limit {
            token: addr(0x01),
            amount: U256::from(100u64),
        }];

        limiter
            .charge_session(digest, &limits, &[(addr(0x01), U256::from(60u64))])
            .unwrap();
        limiter
            .charge_session(digest, &limits, &[(addr(0x01), U256::from(40u64))])
            .unwrap();
        assert_eq!(limiter.session_used(digest, addr(0x01)), U256::from(100u64));

        expect_exceeded(
            limiter.charge_session(digest, &limits, &[(addr(0x01), U256::from(1u64))]),
            addr(0x01),
        );
    }

    #[test]
    fn test_charge_breach_commits_nothing() {
        let mut limiter = SpendingLimiter::new();
        let digest = B256::repeat_byte(0x5e);
        let limits = [
            Limit {
                token: addr(0x01),
                amount: U256::from(100u64),
            },
            Limit {
                token: addr(0x02),
                amount: U256::from(10u64),
            },
        ];

        expect_exceeded(
            limiter.charge_session(
                digest,
                &limits,
                &[
                    (addr(0x01), U256::from(50u64)),
                    (addr(0x02), U256::from(11u64)),
                ],
            ),
            addr(0x02),
        );
        assert_eq!(limiter.session_used(digest, addr(0x01)), U256::ZERO);
        assert_eq!(limiter.session_used(digest, addr(0x02)), U256::ZERO);
    }

    #[test]
    fn test_charge_duplicate_tokens_accumulate_within_one_call() {
        let mut limiter = SpendingLimiter::new();
        let digest = B256::repeat_byte(0x5e);
        let limits = [Limit {
            token: addr(0x01),
            amount: U256::from(100u64),
        }];

        expect_exceeded(
            limiter.charge_session(
                digest,
                &limits,
                &[
                    (addr(0x01), U256::from(60u64)),
                    (addr(0x01), U256::from(60u64)),
                ],
            ),
            addr(0x01),
        );
        assert_eq!(limiter.session_used(digest, addr(0x01)), U256::ZERO);
    }

    #[test]
    fn test_charge_token_without_cap_is_breach() {
        let mut limiter = SpendingLimiter::new();
        let digest = B256::repeat_byte(0x5e);
        let limits = [Limit {
            token: addr(0x01),
            amount: U256::from(100u64),
        }];
        expect_exceeded(
            limiter.charge_session(digest, &limits, &[(addr(0x02), U256::from(1u64))]),
            addr(0x02),
        );
    }

    #[test]
    fn test_charge_unlimited_cap_untracked() {
        let mut limiter = SpendingLimiter::new();
        let digest = B256::repeat_byte(0x5e);
        let limits = [Limit {
            token: addr(0x01),
            amount: UNLIMITED,
        }];
        limiter
            .charge_session(digest, &limits, &[(addr(0x01), U256::MAX)])
            .unwrap();
        assert_eq!(limiter.session_used(digest, addr(0x01)), U256::ZERO);
    }

    #[test]
    fn test_charge_zero_spend_ignored() {
        let mut limiter = SpendingLimiter::new();
        let digest = B256::repeat_byte(0x5e);
        // Zero spends never consult caps, even absent ones.
        limiter
            .charge_session(digest, &[], &[(addr(0x01), U256::ZERO)])
            .unwrap();
        assert_eq!(limiter.session_used(digest, addr(0x01)), U256::ZERO);
    }

    #[test]
    fn test_charges_isolated_per_digest() {
        let mut limiter = SpendingLimiter::new();
        let limits = [Limit {
            token: addr(0x01),
            amount: U256::from(100u64),
        }];

        limiter
            .charge_session(
                B256::repeat_byte(0x5e),
                &limits,
                &[(addr(0x01), U256::from(100u64))],
            )
            .unwrap();
        // A different credential digest has its own headroom.
        limiter
            .charge_session(
                B256::repeat_byte(0x5f),
                &limits,
                &[(addr(0x01), U256::from(100u64))],
            )
            .unwrap();
    }
}
