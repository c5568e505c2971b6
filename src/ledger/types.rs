//! Core ledger types
//!
//! Wallet kinds, entry categories and the immutable ledger entry itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// User identifier as issued by the auth collaborator
pub type UserId = String;

/// Ledger entry identifier
pub type EntryId = Uuid;

/// The three balances every user holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletKind {
    /// Deposits land here; investments are funded from here
    Main,

    /// Capital currently locked in investments
    Investment,

    /// Accrued daily profit
    Profit,
}

impl WalletKind {
    pub const ALL: [WalletKind; 3] = [WalletKind::Main, WalletKind::Investment, WalletKind::Profit];

    /// Whether this wallet can be a wallet-to-wallet transfer endpoint
    pub fn is_transferable(&self) -> bool {
        !matches!(self, WalletKind::Investment)
    }
}

impl std::fmt::Display for WalletKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletKind::Main => write!(f, "main"),
            WalletKind::Investment => write!(f, "investment"),
            WalletKind::Profit => write!(f, "profit"),
        }
    }
}

impl FromStr for WalletKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "main" => Ok(WalletKind::Main),
            "investment" => Ok(WalletKind::Investment),
            "profit" => Ok(WalletKind::Profit),
            other => Err(Error::Validation(format!("unknown wallet kind: {}", other))),
        }
    }
}

/// Direction of a balance movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Credit,
    Debit,
}

/// Reporting category of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Deposit,
    Withdrawal,
    Investment,
    Income,
    Transfer,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Deposit,
        Category::Withdrawal,
        Category::Investment,
        Category::Income,
        Category::Transfer,
    ];

    /// Direction in which this category moves money for reporting
    pub fn natural_direction(&self) -> Direction {
        match self {
            Category::Deposit | Category::Income => Direction::Credit,
            Category::Withdrawal | Category::Investment | Category::Transfer => Direction::Debit,
        }
    }

    /// Directions an original (non-compensating) entry may take
    pub(crate) fn allows(&self, direction: Direction) -> bool {
        match self {
            // Investments move capital Main -> Investment; transfers move between wallets
            Category::Investment | Category::Transfer => true,
            _ => self.natural_direction() == direction,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Deposit => write!(f, "deposit"),
            Category::Withdrawal => write!(f, "withdrawal"),
            Category::Investment => write!(f, "investment"),
            Category::Income => write!(f, "income"),
            Category::Transfer => write!(f, "transfer"),
        }
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deposit" => Ok(Category::Deposit),
            "withdrawal" => Ok(Category::Withdrawal),
            "investment" => Ok(Category::Investment),
            "income" => Ok(Category::Income),
            "transfer" => Ok(Category::Transfer),
            other => Err(Error::Validation(format!("unknown category: {}", other))),
        }
    }
}

/// Settlement status of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Recorded for visibility; no balance effect yet
    Pending,

    /// Counts towards the wallet balance
    Completed,

    /// Recorded for audit; never affects the balance
    Failed,
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryStatus::Pending => write!(f, "pending"),
            EntryStatus::Completed => write!(f, "completed"),
            EntryStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for EntryStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(EntryStatus::Pending),
            "completed" => Ok(EntryStatus::Completed),
            "failed" => Ok(EntryStatus::Failed),
            other => Err(Error::Validation(format!("unknown entry status: {}", other))),
        }
    }
}

/// Immutable balance-affecting record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID
    pub id: EntryId,

    /// Global append order
    pub sequence: u64,

    /// Owning user
    pub owner: UserId,

    /// Wallet the amount applies to
    pub wallet: WalletKind,

    /// Signed amount in minor units (positive = credit)
    pub amount: i64,

    pub category: Category,

    pub status: EntryStatus,

    /// Investment, withdrawal, transfer or deposit this entry belongs to
    pub correlation_id: Option<Uuid>,

    /// Entry this one compensates, if any
    pub reverses: Option<EntryId>,

    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn direction(&self) -> Direction {
        if self.amount > 0 {
            Direction::Credit
        } else {
            Direction::Debit
        }
    }

    /// Contribution to the wallet balance
    pub fn balance_effect(&self) -> i64 {
        match self.status {
            EntryStatus::Completed => self.amount,
            EntryStatus::Pending | EntryStatus::Failed => 0,
        }
    }

    pub fn is_reversal(&self) -> bool {
        self.reverses.is_some()
    }
}

/// Entry as submitted for append; the store assigns id, sequence and time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub owner: UserId,
    pub wallet: WalletKind,
    pub amount: i64,
    pub category: Category,
    pub status: EntryStatus,
    pub correlation_id: Option<Uuid>,
    pub reverses: Option<EntryId>,
}

impl NewEntry {
    /// A completed movement
    pub fn completed(
        owner: impl Into<UserId>,
        wallet: WalletKind,
        amount: i64,
        category: Category,
        correlation_id: Option<Uuid>,
    ) -> Self {
        Self {
            owner: owner.into(),
            wallet,
            amount,
            category,
            status: EntryStatus::Completed,
            correlation_id,
            reverses: None,
        }
    }

    /// The compensating entry for a completed one
    pub fn reversal_of(entry: &LedgerEntry) -> Self {
        Self {
            owner: entry.owner.clone(),
            wallet: entry.wallet,
            amount: -entry.amount,
            category: entry.category,
            status: EntryStatus::Completed,
            correlation_id: entry.correlation_id,
            reverses: Some(entry.id),
        }
    }

    pub fn with_status(mut self, status: EntryStatus) -> Self {
        self.status = status;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_directions() {
        assert_eq!(Category::Deposit.natural_direction(), Direction::Credit);
        assert_eq!(Category::Investment.natural_direction(), Direction::Debit);
        assert!(Category::Transfer.allows(Direction::Credit));
        assert!(!Category::Income.allows(Direction::Debit));
        assert!(!Category::Withdrawal.allows(Direction::Credit));
    }

    #[test]
    fn test_parse_kinds() {
        assert_eq!("Profit".parse::<WalletKind>().unwrap(), WalletKind::Profit);
        assert!("savings".parse::<WalletKind>().is_err());
        assert_eq!("income".parse::<Category>().unwrap(), Category::Income);
        assert!(!WalletKind::Investment.is_transferable());
    }

    #[test]
    fn test_serialization_is_snake_case() {
        let json = serde_json::to_string(&WalletKind::Investment).unwrap();
        assert_eq!(json, "\"investment\"");
        let json = serde_json::to_string(&EntryStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
    }
}
