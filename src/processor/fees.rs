//! Fee math
//!
//! Rates are basis points: `fee = floor(amount * bps / 10_000)`.

use serde::{Deserialize, Serialize};

use crate::config::BPS_DENOMINATOR;
use crate::error::{Error, Result};
use crate::settings::SettingsSnapshot;

/// Gross amount split into fee and net
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeQuote {
    pub amount: u64,
    pub fee_bps: u32,
    pub fee: u64,
    pub net: u64,
}

impl FeeQuote {
    pub fn new(amount: u64, fee_bps: u32) -> Result<Self> {
        if fee_bps >= BPS_DENOMINATOR {
            return Err(Error::Validation(format!(
                "fee rate {} bps would consume the whole amount",
                fee_bps
            )));
        }
        let fee = u128::from(amount) * u128::from(fee_bps) / u128::from(BPS_DENOMINATOR);
        // fee < amount because fee_bps < 10_000
        let fee = u64::try_from(fee).unwrap_or(amount);
        Ok(Self {
            amount,
            fee_bps,
            fee,
            net: amount - fee,
        })
    }
}

/// Fee rates of one settings version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSchedule {
    pub withdrawal_bps: u32,
    pub transfer_bps: u32,
}

impl FeeSchedule {
    pub fn withdrawal(&self, amount: u64) -> Result<FeeQuote> {
        FeeQuote::new(amount, self.withdrawal_bps)
    }

    pub fn transfer(&self, amount: u64) -> Result<FeeQuote> {
        FeeQuote::new(amount, self.transfer_bps)
    }
}

impl From<&SettingsSnapshot> for FeeSchedule {
    fn from(settings: &SettingsSnapshot) -> Self {
        Self {
            withdrawal_bps: settings.withdrawal_fee_bps,
            transfer_bps: settings.transfer_fee_bps,
        }
    }
}
