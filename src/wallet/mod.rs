//! Wallet management module
//!
//! Per-user Main, Investment and Profit balances materialised over the ledger.
//!
//! # Architecture
//!
//! ```text
//! WalletManager ──lock(owner)──► WalletGuard ──append──► LedgerStore
//!        │                           │
//!        └── cached WalletBalances ◄─┘ (updated in the same critical section)
//! ```

pub mod manager;
pub mod types;

pub use manager::{WalletGuard, WalletManager};
pub use types::{BalanceMismatch, WalletBalances};
