//! Wallet & Investment Accounting Engine
//!
//! Append-only ledger, per-user wallets, shop capacity, investment lifecycle,
//! withdrawals and transfers, and a read-only analytics model.

pub mod analytics;
pub mod cli;
pub mod clock;
pub mod config;
pub mod deposit;
pub mod engine;
pub mod error;
pub mod external;
pub mod investment;
pub mod ledger;
pub mod processor;
pub mod settings;
pub mod shop;
pub mod sync;
pub mod wallet;

// Re-export commonly used types
pub use config::Config;
pub use engine::{Collaborators, Engine, EngineSnapshot, PendingRequests, TransactionFilter};
pub use error::{Error, Result};
