//! Shop and reservation types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::config::BPS_DENOMINATOR;
use crate::error::{Error, Result};

pub type ShopId = Uuid;
pub type ReservationId = Uuid;

/// Longest term a shop may offer, in days
pub const MAX_DURATION_DAYS: u32 = 36_500;

/// Lifecycle of a shop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShopStatus {
    /// Accepting investments
    Active,

    /// Temporarily not accepting investments
    Inactive,

    /// Permanently closed
    Closed,

    /// Every slot taken; set automatically
    FullyFunded,
}

impl std::fmt::Display for ShopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShopStatus::Active => write!(f, "active"),
            ShopStatus::Inactive => write!(f, "inactive"),
            ShopStatus::Closed => write!(f, "closed"),
            ShopStatus::FullyFunded => write!(f, "fully_funded"),
        }
    }
}

impl FromStr for ShopStatus {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "active" => Ok(ShopStatus::Active),
            "inactive" => Ok(ShopStatus::Inactive),
            "closed" => Ok(ShopStatus::Closed),
            "fully_funded" => Ok(ShopStatus::FullyFunded),
            other => Err(Error::Validation(format!("unknown shop status: {}", other))),
        }
    }
}

/// An investable shop with fixed capacity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shop {
    pub id: ShopId,
    pub name: String,
    /// Daily profit in hundredths of a percent (150 = 1.50%/day)
    pub daily_percent_bps: u32,
    pub duration_days: u32,
    pub min_amount: u64,
    pub max_amount: u64,
    pub total_slots: u32,
    pub filled_slots: u32,
    pub status: ShopStatus,
    pub created_at: DateTime<Utc>,
}

impl Shop {
    pub fn available_slots(&self) -> u32 {
        self.total_slots.saturating_sub(self.filled_slots)
    }

    pub fn accepts(&self, amount: u64) -> bool {
        amount >= self.min_amount && amount <= self.max_amount
    }

    /// Daily percent as a display string ("1.50")
    pub fn daily_percent_display(&self) -> String {
        format!("{}.{:02}", self.daily_percent_bps / 100, self.daily_percent_bps % 100)
    }
}

/// Admin input for creating a shop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewShop {
    pub name: String,
    /// Falls back to the settings' default profit rate when absent
    pub daily_percent_bps: Option<u32>,
    pub duration_days: u32,
    pub min_amount: u64,
    pub max_amount: u64,
    pub total_slots: u32,
}

impl NewShop {
    pub fn validate(&self, daily_percent_bps: u32) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("shop name cannot be empty".to_string()));
        }
        if daily_percent_bps == 0 || daily_percent_bps > BPS_DENOMINATOR {
            return Err(Error::Validation(format!(
                "daily percent must be within 0.01..=100.00, got {} bps",
                daily_percent_bps
            )));
        }
        if self.duration_days == 0 || self.duration_days > MAX_DURATION_DAYS {
            return Err(Error::Validation(format!(
                "duration_days must be within 1..={}, got {}",
                MAX_DURATION_DAYS, self.duration_days
            )));
        }
        if self.min_amount == 0 || self.min_amount > self.max_amount {
            return Err(Error::Validation(format!(
                "invalid amount range {}..={}",
                self.min_amount, self.max_amount
            )));
        }
        if self.total_slots == 0 {
            return Err(Error::Validation("total_slots must be positive".to_string()));
        }
        Ok(())
    }
}

/// Slots held for an investment being opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub shop_id: ShopId,
    pub slots: u32,
    /// Status to restore if this reservation flipped the shop to FullyFunded
    pub previous_status: ShopStatus,
    pub released: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_shop() -> NewShop {
        NewShop {
            name: "Bakery".to_string(),
            daily_percent_bps: Some(150),
            duration_days: 30,
            min_amount: 1_000,
            max_amount: 50_000,
            total_slots: 10,
        }
    }

    #[test]
    fn test_validate_new_shop() {
        assert!(new_shop().validate(150).is_ok());
        assert!(new_shop().validate(0).is_err());
        assert!(new_shop().validate(10_001).is_err());

        let mut shop = new_shop();
        shop.min_amount = 60_000;
        assert!(shop.validate(150).is_err());

        let mut shop = new_shop();
        shop.total_slots = 0;
        assert!(shop.validate(150).is_err());
    }

    #[test]
    fn test_validate_duration_bounds() {
        let mut shop = new_shop();
        shop.duration_days = MAX_DURATION_DAYS;
        assert!(shop.validate(150).is_ok());

        shop.duration_days = MAX_DURATION_DAYS + 1;
        assert!(matches!(shop.validate(150), Err(Error::Validation(_))));

        shop.duration_days = u32::MAX;
        assert!(shop.validate(150).is_err());

        shop.duration_days = 0;
        assert!(shop.validate(150).is_err());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("fully-funded".parse::<ShopStatus>().unwrap(), ShopStatus::FullyFunded);
        assert!("open".parse::<ShopStatus>().is_err());
    }
}
