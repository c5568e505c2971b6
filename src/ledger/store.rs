//! Append-only ledger store
//!
//! Source of truth for balances and the audit/recovery log. Entries are
//! partitioned per owner; within a partition they are kept in append order,
//! which is also time order.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{Error, Result};

use super::types::{EntryId, LedgerEntry, NewEntry, UserId, WalletKind};

/// One owner's entries
#[derive(Debug, Default)]
struct Partition {
    entries: Vec<LedgerEntry>,
    index: HashMap<EntryId, usize>,
    reversed: HashSet<EntryId>,
}

type PartitionHandle = Arc<RwLock<Partition>>;

/// Append-only store of ledger entries
pub struct LedgerStore {
    partitions: DashMap<UserId, PartitionHandle>,
    sequence: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl LedgerStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            partitions: DashMap::new(),
            sequence: AtomicU64::new(0),
            clock,
        }
    }

    /// Append a new entry
    ///
    /// Fails with [`Error::Validation`] for a zero amount, a direction the
    /// category does not allow, or a reversal that does not exactly mirror an
    /// unreversed completed entry.
    pub fn append(&self, new: NewEntry) -> Result<LedgerEntry> {
        if new.owner.trim().is_empty() {
            return Err(Error::Validation("ledger entry owner is empty".to_string()));
        }
        if new.amount == 0 {
            return Err(Error::Validation("ledger entry amount cannot be zero".to_string()));
        }

        let handle = self.partition(&new.owner);
        let mut partition = handle.write().unwrap_or_else(PoisonError::into_inner);

        let direction = if new.amount > 0 {
            super::types::Direction::Credit
        } else {
            super::types::Direction::Debit
        };

        match new.reverses {
            None => {
                if !new.category.allows(direction) {
                    return Err(Error::Validation(format!(
                        "{} entries cannot be a {:?}",
                        new.category, direction
                    )));
                }
            }
            Some(original_id) => {
                let original = partition
                    .index
                    .get(&original_id)
                    .map(|&i| &partition.entries[i])
                    .ok_or_else(|| {
                        Error::Validation(format!("reversed entry {} not found", original_id))
                    })?;

                if partition.reversed.contains(&original_id) {
                    return Err(Error::Validation(format!(
                        "entry {} is already reversed",
                        original_id
                    )));
                }
                if original.status != super::types::EntryStatus::Completed
                    || new.status != super::types::EntryStatus::Completed
                    || original.wallet != new.wallet
                    || original.category != new.category
                    || original.amount != -new.amount
                {
                    return Err(Error::Validation(format!(
                        "entry does not mirror reversed entry {}",
                        original_id
                    )));
                }
            }
        }

        // Keep the partition time-ordered even if the clock steps back
        let now = self.clock.now();
        let created_at = match partition.entries.last() {
            Some(last) if last.created_at > now => last.created_at,
            _ => now,
        };

        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            owner: new.owner,
            wallet: new.wallet,
            amount: new.amount,
            category: new.category,
            status: new.status,
            correlation_id: new.correlation_id,
            reverses: new.reverses,
            created_at,
        };

        if let Some(original_id) = entry.reverses {
            partition.reversed.insert(original_id);
        }
        let position = partition.entries.len();
        partition.index.insert(entry.id, position);
        partition.entries.push(entry.clone());

        debug!(
            "Ledger append #{}: {} {} {} {} ({})",
            entry.sequence, entry.owner, entry.wallet, entry.amount, entry.category, entry.status
        );

        Ok(entry)
    }

    /// Entries for one wallet, oldest first, optionally starting at `since`
    pub fn entries_for(
        &self,
        owner: &str,
        wallet: WalletKind,
        since: Option<DateTime<Utc>>,
    ) -> LedgerCursor {
        self.cursor(owner, Some(wallet), since, None)
    }

    /// All of an owner's entries within `[since, until)`, oldest first
    pub fn scan(
        &self,
        owner: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> LedgerCursor {
        self.cursor(owner, None, since, until)
    }

    /// Look up a single entry
    pub fn get(&self, owner: &str, id: &EntryId) -> Option<LedgerEntry> {
        let handle = self.partitions.get(owner).map(|p| Arc::clone(p.value()))?;
        let partition = handle.read().unwrap_or_else(PoisonError::into_inner);
        partition
            .index
            .get(id)
            .map(|&i| partition.entries[i].clone())
    }

    /// Whether a completed entry already has a compensating entry
    pub fn is_reversed(&self, owner: &str, id: &EntryId) -> bool {
        self.partitions
            .get(owner)
            .map(|p| Arc::clone(p.value()))
            .map(|handle| {
                handle
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .reversed
                    .contains(id)
            })
            .unwrap_or(false)
    }

    /// Balance of one wallet by full replay (audit path, not the hot path)
    pub fn replay_balance(&self, owner: &str, wallet: WalletKind) -> i64 {
        self.entries_for(owner, wallet, None)
            .map(|e| e.balance_effect())
            .sum()
    }

    /// Owners with at least one entry
    pub fn owners(&self) -> Vec<UserId> {
        self.partitions.iter().map(|p| p.key().clone()).collect()
    }

    /// Every entry across all owners in global append order
    pub fn export(&self) -> Vec<LedgerEntry> {
        let mut all: Vec<LedgerEntry> = self
            .owners()
            .iter()
            .flat_map(|owner| self.scan(owner, None, None))
            .collect();
        all.sort_by_key(|e| e.sequence);
        all
    }

    /// Rebuild from a previously exported log
    pub fn import(&self, entries: Vec<LedgerEntry>) -> Result<()> {
        if !self.partitions.is_empty() {
            return Err(Error::Persistence("ledger is not empty".to_string()));
        }

        let mut max_sequence = 0;
        for entry in entries {
            if entry.amount == 0 {
                return Err(Error::Persistence(format!("entry {} has zero amount", entry.id)));
            }
            max_sequence = max_sequence.max(entry.sequence);

            let handle = self.partition(&entry.owner);
            let mut partition = handle.write().unwrap_or_else(PoisonError::into_inner);
            if partition.index.contains_key(&entry.id) {
                return Err(Error::Persistence(format!("duplicate entry {}", entry.id)));
            }
            if let Some(original_id) = entry.reverses {
                partition.reversed.insert(original_id);
            }
            let position = partition.entries.len();
            partition.index.insert(entry.id, position);
            partition.entries.push(entry);
        }

        self.sequence.store(max_sequence, Ordering::SeqCst);
        Ok(())
    }

    fn partition(&self, owner: &str) -> PartitionHandle {
        if let Some(existing) = self.partitions.get(owner) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.partitions
                .entry(owner.to_string())
                .or_default()
                .value(),
        )
    }

    fn cursor(
        &self,
        owner: &str,
        wallet: Option<WalletKind>,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> LedgerCursor {
        let Some(handle) = self.partitions.get(owner).map(|p| Arc::clone(p.value())) else {
            return LedgerCursor::empty();
        };

        let (start, end) = {
            let partition = handle.read().unwrap_or_else(PoisonError::into_inner);
            let start = since
                .map(|t| partition.entries.partition_point(|e| e.created_at < t))
                .unwrap_or(0);
            let end = until
                .map(|t| partition.entries.partition_point(|e| e.created_at < t))
                .unwrap_or(partition.entries.len());
            (start, end.max(start))
        };

        LedgerCursor {
            partition: Some(handle),
            wallet,
            start,
            position: start,
            end,
        }
    }
}

/// Lazy, restartable walk over a window of one owner's entries
///
/// The window is fixed when the cursor is created; entries appended later are
/// not visited.
#[derive(Clone)]
pub struct LedgerCursor {
    partition: Option<PartitionHandle>,
    wallet: Option<WalletKind>,
    start: usize,
    position: usize,
    end: usize,
}

impl LedgerCursor {
    fn empty() -> Self {
        Self {
            partition: None,
            wallet: None,
            start: 0,
            position: 0,
            end: 0,
        }
    }

    /// Rewind to the beginning of the window
    pub fn restart(&mut self) {
        self.position = self.start;
    }
}

impl Iterator for LedgerCursor {
    type Item = LedgerEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let handle = self.partition.as_ref()?;
        while self.position < self.end {
            let entry = {
                let partition = handle.read().unwrap_or_else(PoisonError::into_inner);
                partition.entries[self.position].clone()
            };
            self.position += 1;

            if self.wallet.map_or(true, |w| w == entry.wallet) {
                return Some(entry);
            }
        }
        None
    }
}
