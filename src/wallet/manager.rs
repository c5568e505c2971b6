//! Wallet manager - core wallet operations
//!
//! Keeps a materialised running balance per user and wallet kind, updated in
//! the same critical section as the ledger append that justifies it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::ledger::{Category, EntryStatus, LedgerEntry, LedgerStore, NewEntry, UserId, WalletKind};
use crate::sync::LockTable;

use super::types::{BalanceMismatch, WalletBalances};

/// Core wallet manager
pub struct WalletManager {
    ledger: Arc<LedgerStore>,
    wallets: LockTable<UserId, WalletBalances>,
}

impl WalletManager {
    pub fn new(ledger: Arc<LedgerStore>, lock_timeout: Duration) -> Self {
        Self {
            ledger,
            wallets: LockTable::new("wallet", lock_timeout),
        }
    }

    pub fn ledger(&self) -> &Arc<LedgerStore> {
        &self.ledger
    }

    /// Lock one user's wallet set for a multi-step operation
    pub async fn lock(&self, owner: &str) -> Result<WalletGuard> {
        if owner.trim().is_empty() {
            return Err(Error::Validation("owner id is empty".to_string()));
        }
        let balances = self
            .wallets
            .lock_or_insert_with(&owner.to_string(), WalletBalances::default)
            .await?;
        Ok(WalletGuard {
            owner: owner.to_string(),
            balances,
            ledger: Arc::clone(&self.ledger),
        })
    }

    /// Credit a wallet
    pub async fn credit(
        &self,
        owner: &str,
        kind: WalletKind,
        amount: u64,
        category: Category,
        correlation_id: Option<Uuid>,
    ) -> Result<LedgerEntry> {
        self.lock(owner)
            .await?
            .credit(kind, amount, category, correlation_id)
    }

    /// Debit a wallet; fails with `InsufficientFunds` rather than going negative
    pub async fn debit(
        &self,
        owner: &str,
        kind: WalletKind,
        amount: u64,
        category: Category,
        correlation_id: Option<Uuid>,
    ) -> Result<LedgerEntry> {
        self.lock(owner)
            .await?
            .debit(kind, amount, category, correlation_id)
    }

    /// Current balance; unknown users have zero everywhere
    pub async fn current_balance(&self, owner: &str, kind: WalletKind) -> Result<u64> {
        Ok(self.balances(owner).await?.get(kind))
    }

    pub async fn balances(&self, owner: &str) -> Result<WalletBalances> {
        let key = owner.to_string();
        if !self.wallets.contains(&key) {
            return Ok(WalletBalances::default());
        }
        self.wallets.read(&key).await
    }

    /// Compare cached balances against a full ledger replay
    pub async fn reconcile(&self, owner: &str) -> Result<Vec<BalanceMismatch>> {
        let guard = self.lock(owner).await?;
        let mut mismatches = Vec::new();

        for kind in WalletKind::ALL {
            let cached = guard.balance(kind);
            let replayed = self.ledger.replay_balance(owner, kind);
            if replayed < 0 || replayed.unsigned_abs() != cached {
                warn!(
                    "Balance mismatch for {} {}: cached {}, replayed {}",
                    owner, kind, cached, replayed
                );
                mismatches.push(BalanceMismatch {
                    owner: owner.to_string(),
                    wallet: kind,
                    cached,
                    replayed,
                });
            }
        }

        Ok(mismatches)
    }

    /// Rebuild every cached balance from the ledger (recovery path)
    pub fn rebuild_from_ledger(&self) -> Result<usize> {
        let owners = self.ledger.owners();
        for owner in &owners {
            let mut balances = WalletBalances::default();
            for kind in WalletKind::ALL {
                let replayed = self.ledger.replay_balance(owner, kind);
                if replayed < 0 {
                    return Err(Error::Persistence(format!(
                        "{} {} wallet replays to negative balance {}",
                        owner, kind, replayed
                    )));
                }
                balances.set(kind, replayed.unsigned_abs());
            }
            if !self.wallets.insert(owner.clone(), balances) {
                return Err(Error::Persistence(format!(
                    "wallet for {} already materialised",
                    owner
                )));
            }
        }

        info!("Rebuilt balances for {} users from ledger", owners.len());
        Ok(owners.len())
    }
}

/// Exclusive access to one user's wallet set
///
/// Balance check, ledger append and cache update happen while this guard is
/// held, so no reader observes a half-applied movement.
pub struct WalletGuard {
    owner: UserId,
    balances: OwnedMutexGuard<WalletBalances>,
    ledger: Arc<LedgerStore>,
}

impl WalletGuard {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn balance(&self, kind: WalletKind) -> u64 {
        self.balances.get(kind)
    }

    pub fn balances(&self) -> WalletBalances {
        *self.balances
    }

    pub fn credit(
        &mut self,
        kind: WalletKind,
        amount: u64,
        category: Category,
        correlation_id: Option<Uuid>,
    ) -> Result<LedgerEntry> {
        let delta = signed(amount)?;
        self.apply(NewEntry::completed(
            self.owner.clone(),
            kind,
            delta,
            category,
            correlation_id,
        ))
    }

    pub fn debit(
        &mut self,
        kind: WalletKind,
        amount: u64,
        category: Category,
        correlation_id: Option<Uuid>,
    ) -> Result<LedgerEntry> {
        let delta = signed(amount)?;
        self.apply(NewEntry::completed(
            self.owner.clone(),
            kind,
            -delta,
            category,
            correlation_id,
        ))
    }

    /// Append the compensating entry for a completed movement
    pub fn compensate(&mut self, entry: &LedgerEntry) -> Result<LedgerEntry> {
        if entry.owner != self.owner {
            return Err(Error::Validation(format!(
                "entry {} belongs to {}, not {}",
                entry.id, entry.owner, self.owner
            )));
        }
        let reversal = self.apply(NewEntry::reversal_of(entry))?;
        warn!(
            "Compensated entry {} for {}: {} {} back",
            entry.id, self.owner, reversal.amount, entry.wallet
        );
        Ok(reversal)
    }

    /// Record a pending or failed entry; never touches the balance
    pub fn record(
        &mut self,
        kind: WalletKind,
        amount: i64,
        category: Category,
        status: EntryStatus,
        correlation_id: Option<Uuid>,
    ) -> Result<LedgerEntry> {
        if status == EntryStatus::Completed {
            return Err(Error::Validation(
                "completed entries must go through credit/debit".to_string(),
            ));
        }
        let entry = NewEntry::completed(self.owner.clone(), kind, amount, category, correlation_id)
            .with_status(status);
        self.ledger.append(entry)
    }

    fn apply(&mut self, entry: NewEntry) -> Result<LedgerEntry> {
        let kind = entry.wallet;
        let next = self.balances.preview(kind, entry.amount)?;
        let appended = self.ledger.append(entry)?;
        self.balances.set(kind, next);

        debug!(
            "{} {} wallet: {:+} -> {} ({})",
            self.owner, kind, appended.amount, next, appended.category
        );
        Ok(appended)
    }
}

fn signed(amount: u64) -> Result<i64> {
    if amount == 0 {
        return Err(Error::Validation("amount must be positive".to_string()));
    }
    i64::try_from(amount).map_err(|_| Error::Validation(format!("amount {} too large", amount)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    fn manager() -> WalletManager {
        let ledger = Arc::new(LedgerStore::new(Arc::new(SystemClock)));
        WalletManager::new(ledger, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_credit_then_debit() {
        let wallets = manager();
        wallets
            .credit("u1", WalletKind::Main, 1_000, Category::Deposit, None)
            .await
            .unwrap();
        wallets
            .debit("u1", WalletKind::Main, 400, Category::Withdrawal, None)
            .await
            .unwrap();

        assert_eq!(wallets.current_balance("u1", WalletKind::Main).await.unwrap(), 600);
        assert!(wallets.reconcile("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_overdraft_leaves_no_trace() {
        let wallets = manager();
        wallets
            .credit("u1", WalletKind::Profit, 50, Category::Income, None)
            .await
            .unwrap();

        let result = wallets
            .debit("u1", WalletKind::Profit, 51, Category::Withdrawal, None)
            .await;
        assert!(matches!(result, Err(Error::InsufficientFunds { .. })));
        assert_eq!(wallets.current_balance("u1", WalletKind::Profit).await.unwrap(), 50);
        assert_eq!(wallets.ledger().scan("u1", None, None).count(), 1);
    }

    #[tokio::test]
    async fn test_rejected_append_leaves_balance_untouched() {
        let wallets = manager();
        // Income can only be credited
        let result = wallets
            .lock("u1")
            .await
            .unwrap()
            .apply(NewEntry::completed("u1", WalletKind::Profit, -1, Category::Income, None));
        assert!(result.is_err());
        assert_eq!(wallets.balances("u1").await.unwrap(), WalletBalances::default());
    }

    #[tokio::test]
    async fn test_compensate_restores_balance() {
        let wallets = manager();
        wallets
            .credit("u1", WalletKind::Main, 300, Category::Deposit, None)
            .await
            .unwrap();

        let mut guard = wallets.lock("u1").await.unwrap();
        let debit = guard
            .debit(WalletKind::Main, 300, Category::Investment, None)
            .unwrap();
        assert_eq!(guard.balance(WalletKind::Main), 0);
        guard.compensate(&debit).unwrap();
        assert_eq!(guard.balance(WalletKind::Main), 300);
    }

    #[tokio::test]
    async fn test_rebuild_from_ledger() {
        let wallets = manager();
        wallets
            .credit("u1", WalletKind::Main, 900, Category::Deposit, None)
            .await
            .unwrap();
        wallets
            .credit("u2", WalletKind::Profit, 15, Category::Income, None)
            .await
            .unwrap();

        let rebuilt = WalletManager::new(Arc::clone(wallets.ledger()), Duration::from_millis(200));
        assert_eq!(rebuilt.rebuild_from_ledger().unwrap(), 2);
        assert_eq!(rebuilt.current_balance("u1", WalletKind::Main).await.unwrap(), 900);
        assert_eq!(rebuilt.current_balance("u2", WalletKind::Profit).await.unwrap(), 15);
    }
}
