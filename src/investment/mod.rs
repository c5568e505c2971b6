//! Investment lifecycle module
//!
//! ```text
//! Active ──(today >= end_date)──► Matured ──(capital withdrawal settles)──► CapitalWithdrawn
//! ```
//!
//! Profit for day N is `floor(capital * dailyPercent / 100) * N`, capped at the
//! investment's duration.

pub mod lifecycle;
pub mod types;

pub use lifecycle::InvestmentManager;
pub use types::{daily_profit, AccrualReport, Investment, InvestmentId, InvestmentStatus};
