//! Core types for wallet management

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ledger::{UserId, WalletKind};

/// Materialised balances of one user's wallet set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalances {
    pub main: u64,
    pub investment: u64,
    pub profit: u64,
}

impl WalletBalances {
    pub fn get(&self, kind: WalletKind) -> u64 {
        match kind {
            WalletKind::Main => self.main,
            WalletKind::Investment => self.investment,
            WalletKind::Profit => self.profit,
        }
    }

    fn slot(&mut self, kind: WalletKind) -> &mut u64 {
        match kind {
            WalletKind::Main => &mut self.main,
            WalletKind::Investment => &mut self.investment,
            WalletKind::Profit => &mut self.profit,
        }
    }

    /// Balance after applying a signed delta, without committing it
    pub fn preview(&self, kind: WalletKind, delta: i64) -> Result<u64> {
        let current = self.get(kind);
        if delta >= 0 {
            current
                .checked_add(delta.unsigned_abs())
                .ok_or_else(|| Error::Validation(format!("{} balance overflow", kind)))
        } else {
            let required = delta.unsigned_abs();
            current.checked_sub(required).ok_or(Error::InsufficientFunds {
                available: current,
                required,
            })
        }
    }

    pub(crate) fn set(&mut self, kind: WalletKind, value: u64) {
        *self.slot(kind) = value;
    }

    pub fn total(&self) -> u64 {
        self.main
            .saturating_add(self.investment)
            .saturating_add(self.profit)
    }
}

/// Difference between the cached balance and a full ledger replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceMismatch {
    pub owner: UserId,
    pub wallet: WalletKind,
    pub cached: u64,
    pub replayed: i64,
}

impl std::fmt::Display for BalanceMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} wallet: cached {} but ledger replays to {}",
            self.owner, self.wallet, self.cached, self.replayed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_never_goes_negative() {
        let balances = WalletBalances {
            main: 100,
            investment: 0,
            profit: 5,
        };
        assert_eq!(balances.preview(WalletKind::Main, -100).unwrap(), 0);
        assert!(matches!(
            balances.preview(WalletKind::Profit, -6),
            Err(Error::InsufficientFunds {
                available: 5,
                required: 6
            })
        ));
        assert_eq!(balances.preview(WalletKind::Investment, 40).unwrap(), 40);
    }
}
