//! Investment types and profit math

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::BPS_DENOMINATOR;
use crate::error::{Error, Result};
use crate::ledger::UserId;
use crate::shop::{ReservationId, Shop, ShopId};

pub type InvestmentId = Uuid;

/// Investment lifecycle: `Active -> Matured -> CapitalWithdrawn`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentStatus {
    Active,
    Matured,
    CapitalWithdrawn,
}

impl std::fmt::Display for InvestmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvestmentStatus::Active => write!(f, "active"),
            InvestmentStatus::Matured => write!(f, "matured"),
            InvestmentStatus::CapitalWithdrawn => write!(f, "capital_withdrawn"),
        }
    }
}

/// A user's position in a shop
///
/// Terms are copied from the shop at purchase time and never change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Investment {
    pub id: InvestmentId,
    pub owner: UserId,
    pub shop_id: ShopId,
    pub shop_name: String,
    pub daily_percent_bps: u32,
    pub duration_days: u32,
    pub capital: u64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Profit credited so far
    pub accrued_profit: u64,
    /// Number of days already credited
    pub accrued_days: u32,
    pub status: InvestmentStatus,
    pub reservation_id: ReservationId,
    /// Capital withdrawal awaiting settlement, if any
    pub capital_request: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub matured_at: Option<DateTime<Utc>>,
    pub capital_withdrawn_at: Option<DateTime<Utc>>,
}

impl Investment {
    /// Snapshot the shop's terms into a new investment
    ///
    /// Fails if the term would end past the last representable date.
    pub fn from_shop(
        id: InvestmentId,
        owner: UserId,
        shop: &Shop,
        capital: u64,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let start_date = now.date_naive();
        let end_date = start_date
            .checked_add_days(Days::new(u64::from(shop.duration_days)))
            .ok_or_else(|| {
                Error::Validation(format!(
                    "a {}-day term starting {} ends out of range",
                    shop.duration_days, start_date
                ))
            })?;
        Ok(Self {
            id,
            owner,
            shop_id: shop.id,
            shop_name: shop.name.clone(),
            daily_percent_bps: shop.daily_percent_bps,
            duration_days: shop.duration_days,
            capital,
            start_date,
            end_date,
            accrued_profit: 0,
            accrued_days: 0,
            status: InvestmentStatus::Active,
            reservation_id,
            capital_request: None,
            created_at: now,
            matured_at: None,
            capital_withdrawn_at: None,
        })
    }

    /// `floor(capital * dailyPercent / 100)`
    pub fn daily_profit(&self) -> u64 {
        daily_profit(self.capital, self.daily_percent_bps)
    }

    /// Profit owed after `day` days, capped at the duration
    pub fn profit_through(&self, day: u32) -> u64 {
        self.daily_profit()
            .saturating_mul(u64::from(day.min(self.duration_days)))
    }

    /// Total profit over the full term
    pub fn expected_profit(&self) -> u64 {
        self.profit_through(self.duration_days)
    }

    /// Number of whole days earned as of `today`, capped at the duration
    ///
    /// Day N is earned once `today >= start_date + N`.
    pub fn days_earned(&self, today: NaiveDate) -> u32 {
        let elapsed = (today - self.start_date).num_days().max(0);
        u32::try_from(elapsed)
            .unwrap_or(u32::MAX)
            .min(self.duration_days)
    }

    /// Day index that `date` completes; dates past the end map to the last day
    pub fn day_index(&self, date: NaiveDate) -> Option<u32> {
        let n = (date - self.start_date).num_days();
        if n < 1 {
            return None;
        }
        Some(u32::try_from(n).unwrap_or(u32::MAX).min(self.duration_days))
    }

    pub fn is_due_to_mature(&self, today: NaiveDate) -> bool {
        self.status == InvestmentStatus::Active && today >= self.end_date
    }

    /// Capital can be withdrawn once matured and not yet withdrawn
    pub fn is_capital_eligible(&self, today: NaiveDate) -> bool {
        today >= self.end_date && self.status == InvestmentStatus::Matured
    }

    pub fn is_terminal(&self) -> bool {
        self.status == InvestmentStatus::CapitalWithdrawn
    }
}

/// `floor(capital * bps / 10_000)` without intermediate overflow
pub fn daily_profit(capital: u64, daily_percent_bps: u32) -> u64 {
    let raw = u128::from(capital) * u128::from(daily_percent_bps) / u128::from(BPS_DENOMINATOR);
    u64::try_from(raw).unwrap_or(u64::MAX)
}

/// Outcome of one accrual pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccrualReport {
    /// Investments examined
    pub investments: usize,
    /// Day credits written
    pub days_accrued: u32,
    /// Profit credited in this pass
    pub profit_credited: u64,
    /// Investments that flipped to Matured
    pub matured: Vec<InvestmentId>,
    /// Investments skipped because of a lock conflict (retry later)
    pub deferred: Vec<InvestmentId>,
}

impl AccrualReport {
    pub(crate) fn merge(&mut self, other: AccrualReport) {
        self.investments += other.investments;
        self.days_accrued += other.days_accrued;
        self.profit_credited = self.profit_credited.saturating_add(other.profit_credited);
        self.matured.extend(other.matured);
        self.deferred.extend(other.deferred);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shop::ShopStatus;
    use chrono::Duration;

    fn investment(capital: u64, bps: u32, days: u32) -> Investment {
        let shop = Shop {
            id: Uuid::new_v4(),
            name: "Kiosk".to_string(),
            daily_percent_bps: bps,
            duration_days: days,
            min_amount: 1,
            max_amount: u64::MAX,
            total_slots: 1,
            filled_slots: 0,
            status: ShopStatus::Active,
            created_at: Utc::now(),
        };
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_time(chrono::NaiveTime::MIN)
            .and_utc();
        Investment::from_shop(Uuid::new_v4(), "u1".into(), &shop, capital, Uuid::new_v4(), start)
            .unwrap()
    }

    #[test]
    fn test_daily_profit_floors() {
        // 1.50% of 10_001 = 150.015
        assert_eq!(daily_profit(10_001, 150), 150);
        assert_eq!(daily_profit(999, 100), 9);
        assert_eq!(daily_profit(u64::MAX, 10_000), u64::MAX);
    }

    #[test]
    fn test_profit_caps_at_duration() {
        let inv = investment(10_000, 200, 30);
        assert_eq!(inv.daily_profit(), 200);
        assert_eq!(inv.profit_through(10), 2_000);
        assert_eq!(inv.profit_through(45), 6_000);
        assert_eq!(inv.expected_profit(), 6_000);
    }

    #[test]
    fn test_dates() {
        let inv = investment(10_000, 200, 30);
        assert_eq!(inv.end_date, NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
        assert_eq!(inv.days_earned(NaiveDate::from_ymd_opt(2023, 12, 25).unwrap()), 0);
        assert_eq!(inv.days_earned(NaiveDate::from_ymd_opt(2024, 1, 11).unwrap()), 10);
        assert_eq!(inv.days_earned(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()), 30);

        assert_eq!(inv.day_index(inv.start_date), None);
        assert_eq!(inv.day_index(inv.end_date), Some(30));
        assert_eq!(inv.day_index(inv.end_date + Duration::days(1)), Some(30));
    }

    #[test]
    fn test_term_past_last_date_is_rejected() {
        let shop = Shop {
            id: Uuid::new_v4(),
            name: "Kiosk".to_string(),
            daily_percent_bps: 100,
            duration_days: 10,
            min_amount: 1,
            max_amount: u64::MAX,
            total_slots: 1,
            filled_slots: 0,
            status: ShopStatus::Active,
            created_at: Utc::now(),
        };
        let late = (NaiveDate::MAX - Duration::days(5))
            .and_time(chrono::NaiveTime::MIN)
            .and_utc();
        let result =
            Investment::from_shop(Uuid::new_v4(), "u1".into(), &shop, 1_000, Uuid::new_v4(), late);
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_capital_eligibility_boundary() {
        let mut inv = investment(10_000, 200, 30);
        let end = inv.end_date;

        assert!(!inv.is_capital_eligible(end));
        inv.status = InvestmentStatus::Matured;
        assert!(inv.is_capital_eligible(end));
        assert!(!inv.is_capital_eligible(end - Duration::days(1)));

        inv.status = InvestmentStatus::CapitalWithdrawn;
        assert!(!inv.is_capital_eligible(end));
    }
}
