//! Analytics aggregator
//!
//! Read model over the ledger. Each completed entry counts in its category's
//! natural direction (deposit and income credit, everything else debits);
//! compensating entries subtract what they undo, so a rejected withdrawal
//! nets to zero.

use std::collections::BTreeMap;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ledger::{Category, EntryStatus, LedgerEntry, LedgerStore, UserId};

/// Half-open time window `[since, until)`; open ends are unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn all() -> Self {
        Self::default()
    }

    /// Whole days `from..=to`
    pub fn days(from: NaiveDate, to: NaiveDate) -> Result<Self> {
        if from > to {
            return Err(Error::Validation(format!("date range {} > {}", from, to)));
        }
        let after = to
            .checked_add_days(Days::new(1))
            .ok_or_else(|| Error::Validation(format!("date {} is out of range", to)))?;
        Ok(Self {
            since: Some(from.and_time(NaiveTime::MIN).and_utc()),
            until: Some(after.and_time(NaiveTime::MIN).and_utc()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub owner: UserId,
    pub range: DateRange,
    pub totals: BTreeMap<Category, i64>,
    /// deposits + income - withdrawals - investments
    pub net_flow: i64,
    /// Completed entries scanned
    pub entries: usize,
}

/// Signed contribution of one completed entry to its category total
fn contribution(entry: &LedgerEntry) -> i64 {
    let natural = entry.direction() == entry.category.natural_direction();
    let magnitude = i64::try_from(entry.amount.unsigned_abs()).unwrap_or(i64::MAX);
    match (entry.is_reversal(), natural) {
        (false, true) => magnitude,
        (true, false) => -magnitude,
        _ => 0,
    }
}

/// Sum of completed entries per category; every category is present
pub fn totals_by_category(
    ledger: &LedgerStore,
    owner: &str,
    range: DateRange,
) -> BTreeMap<Category, i64> {
    summarize(ledger, owner, range).totals
}

pub fn net_flow(ledger: &LedgerStore, owner: &str, range: DateRange) -> i64 {
    summarize(ledger, owner, range).net_flow
}

pub fn summarize(ledger: &LedgerStore, owner: &str, range: DateRange) -> AnalyticsSummary {
    let mut totals: BTreeMap<Category, i64> = Category::ALL.iter().map(|c| (*c, 0)).collect();
    let mut entries = 0;

    for entry in ledger
        .scan(owner, range.since, range.until)
        .filter(|e| e.status == EntryStatus::Completed)
    {
        entries += 1;
        *totals.entry(entry.category).or_insert(0) += contribution(&entry);
    }

    let total = |c: Category| totals.get(&c).copied().unwrap_or(0);
    let net_flow = total(Category::Deposit) + total(Category::Income)
        - total(Category::Withdrawal)
        - total(Category::Investment);

    AnalyticsSummary {
        owner: owner.to_string(),
        range,
        totals,
        net_flow,
        entries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ledger::{NewEntry, WalletKind};
    use std::sync::Arc;

    fn append(ledger: &LedgerStore, wallet: WalletKind, amount: i64, category: Category) -> LedgerEntry {
        ledger
            .append(NewEntry::completed("u1", wallet, amount, category, None))
            .unwrap()
    }

    #[test]
    fn test_fixture_net_flow() {
        let clock = Arc::new(ManualClock::at_date(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()));
        let ledger = LedgerStore::new(clock.clone());

        append(&ledger, WalletKind::Main, 50_000, Category::Deposit);
        append(&ledger, WalletKind::Main, -30_000, Category::Investment);
        append(&ledger, WalletKind::Investment, 30_000, Category::Investment);
        clock.advance_days(1);
        append(&ledger, WalletKind::Profit, 450, Category::Income);
        append(&ledger, WalletKind::Profit, 300, Category::Income);
        let rejected = append(&ledger, WalletKind::Profit, -700, Category::Withdrawal);
        ledger.append(NewEntry::reversal_of(&rejected)).unwrap();
        append(&ledger, WalletKind::Main, -1_000, Category::Withdrawal);
        ledger
            .append(
                NewEntry::completed("u1", WalletKind::Main, 9_999, Category::Deposit, None)
                    .with_status(EntryStatus::Pending),
            )
            .unwrap();

        let totals = totals_by_category(&ledger, "u1", DateRange::all());
        assert_eq!(totals[&Category::Deposit], 50_000);
        assert_eq!(totals[&Category::Investment], 30_000);
        assert_eq!(totals[&Category::Income], 750);
        assert_eq!(totals[&Category::Withdrawal], 1_000);
        assert_eq!(totals[&Category::Transfer], 0);

        // 50_000 + 750 - 1_000 - 30_000
        assert_eq!(net_flow(&ledger, "u1", DateRange::all()), 19_750);

        let first_day = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let day = DateRange::days(first_day, first_day).unwrap();
        assert_eq!(net_flow(&ledger, "u1", day), 20_000);
    }

    #[test]
    fn test_days_rejects_bad_bounds() {
        let first_day = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        assert!(matches!(
            DateRange::days(first_day, NaiveDate::MAX),
            Err(Error::Validation(_))
        ));
        assert!(DateRange::days(first_day, first_day.pred_opt().unwrap()).is_err());
        assert!(DateRange::days(NaiveDate::MIN, first_day).is_ok());
    }

    #[test]
    fn test_unknown_owner_is_zero() {
        let ledger = LedgerStore::new(Arc::new(ManualClock::at_date(
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        )));
        let summary = summarize(&ledger, "ghost", DateRange::all());
        assert_eq!(summary.net_flow, 0);
        assert_eq!(summary.totals.len(), Category::ALL.len());
    }
}
