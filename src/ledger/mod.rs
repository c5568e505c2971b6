//! Ledger module
//!
//! Durable, append-only record of every balance-affecting event. Wallet
//! balances are materialised from it; a failed or reversed operation appends a
//! compensating entry instead of touching history.

pub mod store;
pub mod types;

pub use store::{LedgerCursor, LedgerStore};
pub use types::{
    Category, Direction, EntryId, EntryStatus, LedgerEntry, NewEntry, UserId, WalletKind,
};
