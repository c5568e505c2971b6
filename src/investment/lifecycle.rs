//! Investment lifecycle manager
//!
//! Opens investments against shops, accrues daily profit into the owner's
//! Profit wallet, matures investments at their end date and guards capital
//! withdrawal eligibility.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::ledger::{Category, LedgerEntry, UserId, WalletKind};
use crate::shop::{Reservation, ShopCapacityManager, ShopId, ShopStatus};
use crate::sync::LockTable;
use crate::wallet::{WalletGuard, WalletManager};

use super::types::{AccrualReport, Investment, InvestmentId, InvestmentStatus};

/// Slots consumed by one investment
const SLOTS_PER_INVESTMENT: u32 = 1;

/// Creates, accrues and matures investments
pub struct InvestmentManager {
    investments: LockTable<InvestmentId, Investment>,
    by_owner: DashMap<UserId, Vec<InvestmentId>>,
    wallets: Arc<WalletManager>,
    shops: Arc<ShopCapacityManager>,
    clock: Arc<dyn Clock>,
}

impl InvestmentManager {
    pub fn new(
        wallets: Arc<WalletManager>,
        shops: Arc<ShopCapacityManager>,
        clock: Arc<dyn Clock>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            investments: LockTable::new("investment", lock_timeout),
            by_owner: DashMap::new(),
            wallets,
            shops,
            clock,
        }
    }

    /// Open an investment
    ///
    /// Locks the owner's wallets, reserves a shop slot, moves the capital from
    /// Main to Investment and records the investment. A failure after the
    /// reservation or debit compensates both before returning.
    pub async fn open(&self, owner: &str, shop_id: &ShopId, capital: u64) -> Result<Investment> {
        let shop = self.shops.get(shop_id).await?;

        if !shop.accepts(capital) {
            return Err(Error::OutOfRange {
                amount: capital,
                min: shop.min_amount,
                max: shop.max_amount,
            });
        }
        // FullyFunded is left for the reservation to report as capacity
        if matches!(shop.status, ShopStatus::Inactive | ShopStatus::Closed) {
            return Err(Error::ShopNotActive {
                shop: shop.id.to_string(),
                status: shop.status.to_string(),
            });
        }

        let id = Uuid::new_v4();

        // Wallet before shop
        let mut wallet = self.wallets.lock(owner).await?;
        let available = wallet.balance(WalletKind::Main);
        if available < capital {
            return Err(Error::InsufficientFunds {
                available,
                required: capital,
            });
        }

        let (reservation, shop) = self.shops.reserve(shop_id, SLOTS_PER_INVESTMENT).await?;

        let mut applied = Vec::with_capacity(2);
        let moves = [
            (WalletKind::Main, false),
            (WalletKind::Investment, true),
        ];
        for (kind, is_credit) in moves {
            let result = if is_credit {
                wallet.credit(kind, capital, Category::Investment, Some(id))
            } else {
                wallet.debit(kind, capital, Category::Investment, Some(id))
            };
            match result {
                Ok(entry) => applied.push(entry),
                Err(e) => {
                    self.rollback_open(&mut wallet, &applied, &reservation).await;
                    return Err(e);
                }
            }
        }

        let investment = match Investment::from_shop(
            id,
            owner.to_string(),
            &shop,
            capital,
            reservation.id,
            self.clock.now(),
        ) {
            Ok(investment) => investment,
            Err(e) => {
                self.rollback_open(&mut wallet, &applied, &reservation).await;
                return Err(e);
            }
        };

        if !self.investments.insert(id, investment.clone()) {
            self.rollback_open(&mut wallet, &applied, &reservation).await;
            return Err(Error::Validation(format!("investment {} already exists", id)));
        }
        self.by_owner.entry(owner.to_string()).or_default().push(id);

        info!(
            "Opened investment {} for {}: {} in {} ({}/{} slots), matures {}",
            id,
            owner,
            capital,
            shop.name,
            shop.filled_slots,
            shop.total_slots,
            investment.end_date
        );
        Ok(investment)
    }

    async fn rollback_open(
        &self,
        wallet: &mut WalletGuard,
        applied: &[LedgerEntry],
        reservation: &Reservation,
    ) {
        for entry in applied.iter().rev() {
            if let Err(e) = wallet.compensate(entry) {
                error!("Failed to compensate entry {}: {}", entry.id, e);
            }
        }
        if let Err(e) = self.shops.release(&reservation.id).await {
            error!("Failed to release reservation {}: {}", reservation.id, e);
        }
    }

    /// Credit the profit for the day `date` completes
    ///
    /// Earlier unaccrued days are credited first. Already-accrued days are a
    /// no-op, so retries for the same investment and date write nothing.
    pub async fn accrue_day(&self, id: &InvestmentId, date: NaiveDate) -> Result<Vec<LedgerEntry>> {
        let mut investment = self.investments.lock(id).await?;
        if investment.status != InvestmentStatus::Active {
            return Ok(Vec::new());
        }
        let Some(day) = investment.day_index(date) else {
            return Ok(Vec::new());
        };
        self.accrue_locked(&mut investment, day).await
    }

    /// Accrue every elapsed day for every active investment
    pub async fn accrue_daily(&self, today: NaiveDate) -> Result<AccrualReport> {
        let mut report = AccrualReport::default();

        for id in self.investments.keys() {
            let mut investment = match self.investments.lock(&id).await {
                Ok(guard) => guard,
                Err(e) if e.is_retryable() => {
                    warn!("Deferring accrual for {}: {}", id, e);
                    report.deferred.push(id);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if investment.status != InvestmentStatus::Active {
                continue;
            }

            report.investments += 1;
            let through = investment.days_earned(today);
            let entries = self.accrue_locked(&mut investment, through).await?;
            report.days_accrued += entries.len() as u32;
            report.profit_credited = report
                .profit_credited
                .saturating_add(entries.iter().map(|e| e.amount.unsigned_abs()).sum());
        }

        Ok(report)
    }

    /// Flip every investment past its end date to Matured
    ///
    /// Capital stays in the Investment wallet until explicitly withdrawn.
    pub async fn maturity_check(&self, today: NaiveDate) -> Result<Vec<InvestmentId>> {
        let mut matured = Vec::new();
        for id in self.investments.keys() {
            let mut investment = self.investments.lock(&id).await?;
            if self.mature_locked(&mut investment, today).await? {
                matured.push(id);
            }
        }
        Ok(matured)
    }

    /// Accrual catch-up followed by the maturity check for one investment
    pub async fn refresh(&self, id: &InvestmentId, today: NaiveDate) -> Result<Investment> {
        let mut investment = self.investments.lock(id).await?;
        self.refresh_locked(&mut investment, today).await?;
        Ok(investment.clone())
    }

    /// Daily job: refresh every non-terminal investment
    pub async fn run_daily(&self, today: NaiveDate) -> Result<AccrualReport> {
        let mut report = AccrualReport::default();

        for id in self.investments.keys() {
            let mut investment = match self.investments.lock(&id).await {
                Ok(guard) => guard,
                Err(e) if e.is_retryable() => {
                    warn!("Deferring daily run for {}: {}", id, e);
                    report.deferred.push(id);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if investment.is_terminal() {
                continue;
            }
            report.merge(self.refresh_locked(&mut investment, today).await?);
        }

        info!(
            "Daily run for {}: {} investments, {} days accrued, {} profit, {} matured",
            today,
            report.investments,
            report.days_accrued,
            report.profit_credited,
            report.matured.len()
        );
        Ok(report)
    }

    /// True iff the investment has matured and its capital is still in place
    pub fn is_capital_eligible(&self, investment: &Investment, today: NaiveDate) -> bool {
        investment.is_capital_eligible(today)
    }

    pub async fn get(&self, id: &InvestmentId) -> Result<Investment> {
        self.investments.read(id).await
    }

    pub async fn list_for(&self, owner: &str) -> Result<Vec<Investment>> {
        let ids = self
            .by_owner
            .get(owner)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(self.investments.read(&id).await?);
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    pub(crate) async fn lock(&self, id: &InvestmentId) -> Result<OwnedMutexGuard<Investment>> {
        self.investments.lock(id).await
    }

    pub(crate) async fn refresh_locked(
        &self,
        investment: &mut Investment,
        today: NaiveDate,
    ) -> Result<AccrualReport> {
        let mut report = AccrualReport {
            investments: 1,
            ..Default::default()
        };

        if investment.status == InvestmentStatus::Active {
            let through = investment.days_earned(today);
            let entries = self.accrue_locked(investment, through).await?;
            report.days_accrued = entries.len() as u32;
            report.profit_credited = entries.iter().map(|e| e.amount.unsigned_abs()).sum();
        }
        if self.mature_locked(investment, today).await? {
            report.matured.push(investment.id);
        }
        Ok(report)
    }

    /// Reserve the investment for a capital withdrawal of `amount`
    pub(crate) fn begin_capital_withdrawal(
        &self,
        investment: &mut Investment,
        request_id: Uuid,
        amount: u64,
        today: NaiveDate,
    ) -> Result<()> {
        if investment.status == InvestmentStatus::CapitalWithdrawn {
            return Err(Error::NotEligible(format!(
                "capital of investment {} was already withdrawn",
                investment.id
            )));
        }
        if !investment.is_capital_eligible(today) {
            return Err(Error::NotEligible(format!(
                "investment {} matures on {}",
                investment.id, investment.end_date
            )));
        }
        if let Some(pending) = investment.capital_request {
            return Err(Error::NotEligible(format!(
                "capital withdrawal {} is already in progress",
                pending
            )));
        }
        if amount != investment.capital {
            return Err(Error::Validation(format!(
                "capital withdrawal must be for the full capital of {}",
                investment.capital
            )));
        }

        investment.capital_request = Some(request_id);
        Ok(())
    }

    /// Settlement confirmed: the capital has left the platform
    pub(crate) fn complete_capital_withdrawal(&self, investment: &mut Investment, request_id: Uuid) {
        if investment.capital_request != Some(request_id) {
            warn!(
                "Capital request {} does not match investment {}",
                request_id, investment.id
            );
        }
        investment.capital_request = None;
        investment.status = InvestmentStatus::CapitalWithdrawn;
        investment.capital_withdrawn_at = Some(self.clock.now());
        info!("Investment {} capital withdrawn", investment.id);
    }

    /// Request rejected, cancelled or failed: capital stays put
    pub(crate) fn abort_capital_withdrawal(&self, investment: &mut Investment, request_id: Uuid) {
        if investment.capital_request == Some(request_id) {
            investment.capital_request = None;
            debug!("Cleared capital request {} on {}", request_id, investment.id);
        }
    }

    async fn accrue_locked(
        &self,
        investment: &mut Investment,
        through_day: u32,
    ) -> Result<Vec<LedgerEntry>> {
        let through_day = through_day.min(investment.duration_days);
        if through_day <= investment.accrued_days {
            return Ok(Vec::new());
        }

        let mut wallet = self.wallets.lock(&investment.owner).await?;
        let mut entries = Vec::new();

        for day in (investment.accrued_days + 1)..=through_day {
            let amount = investment.profit_through(day) - investment.profit_through(day - 1);
            if amount > 0 {
                let entry = wallet.credit(
                    WalletKind::Profit,
                    amount,
                    Category::Income,
                    Some(investment.id),
                )?;
                entries.push(entry);
            }
            investment.accrued_days = day;
            investment.accrued_profit = investment.profit_through(day);
        }

        debug!(
            "Accrued {} day(s) on {}: {} of {} days, {} profit",
            entries.len(),
            investment.id,
            investment.accrued_days,
            investment.duration_days,
            investment.accrued_profit
        );
        Ok(entries)
    }

    async fn mature_locked(&self, investment: &mut Investment, today: NaiveDate) -> Result<bool> {
        if !investment.is_due_to_mature(today) {
            return Ok(false);
        }

        // Never mature with days still owed
        let duration = investment.duration_days;
        self.accrue_locked(investment, duration).await?;

        investment.status = InvestmentStatus::Matured;
        investment.matured_at = Some(self.clock.now());
        info!(
            "Investment {} matured: capital {}, profit {}",
            investment.id, investment.capital, investment.accrued_profit
        );
        Ok(true)
    }

    pub async fn export(&self) -> Result<Vec<Investment>> {
        let mut all = self.investments.values().await?;
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    pub fn import(&self, investments: Vec<Investment>) -> Result<()> {
        for investment in investments {
            if investment.accrued_days > investment.duration_days {
                return Err(Error::Persistence(format!(
                    "investment {} accrued past its duration",
                    investment.id
                )));
            }
            let (id, owner) = (investment.id, investment.owner.clone());
            if !self.investments.insert(id, investment) {
                return Err(Error::Persistence(format!("duplicate investment {}", id)));
            }
            self.by_owner.entry(owner).or_default().push(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ledger::LedgerStore;
    use crate::shop::NewShop;

    struct Fixture {
        clock: Arc<ManualClock>,
        wallets: Arc<WalletManager>,
        shops: Arc<ShopCapacityManager>,
        investments: InvestmentManager,
    }

    fn fixture() -> Fixture {
        fixture_at(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
    }

    fn fixture_at(today: NaiveDate) -> Fixture {
        let clock = Arc::new(ManualClock::at_date(today));
        let timeout = Duration::from_secs(1);
        let ledger = Arc::new(LedgerStore::new(clock.clone()));
        let wallets = Arc::new(WalletManager::new(ledger, timeout));
        let shops = Arc::new(ShopCapacityManager::new(clock.clone(), timeout));
        let investments =
            InvestmentManager::new(wallets.clone(), shops.clone(), clock.clone(), timeout);
        Fixture {
            clock,
            wallets,
            shops,
            investments,
        }
    }

    fn shop(fx: &Fixture, slots: u32) -> ShopId {
        fx.shops
            .create_shop(
                NewShop {
                    name: "Bakery".to_string(),
                    daily_percent_bps: Some(150),
                    duration_days: 10,
                    min_amount: 1_000,
                    max_amount: 100_000,
                    total_slots: slots,
                },
                100,
            )
            .unwrap()
            .id
    }

    async fn fund(fx: &Fixture, owner: &str, amount: u64) {
        fx.wallets
            .credit(owner, WalletKind::Main, amount, Category::Deposit, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_open_moves_capital() {
        let fx = fixture();
        let shop_id = shop(&fx, 5);
        fund(&fx, "u1", 20_000).await;

        let inv = fx.investments.open("u1", &shop_id, 10_000).await.unwrap();
        assert_eq!(inv.status, InvestmentStatus::Active);
        assert_eq!(inv.daily_percent_bps, 150);
        assert_eq!(inv.end_date, NaiveDate::from_ymd_opt(2024, 5, 11).unwrap());

        let balances = fx.wallets.balances("u1").await.unwrap();
        assert_eq!(balances.main, 10_000);
        assert_eq!(balances.investment, 10_000);
        assert_eq!(fx.shops.get(&shop_id).await.unwrap().filled_slots, 1);
    }

    #[tokio::test]
    async fn test_open_failures() {
        let fx = fixture();
        let shop_id = shop(&fx, 1);
        fund(&fx, "u1", 5_000).await;

        assert!(matches!(
            fx.investments.open("u1", &shop_id, 500).await,
            Err(Error::OutOfRange { .. })
        ));
        assert!(matches!(
            fx.investments.open("u1", &shop_id, 6_000).await,
            Err(Error::InsufficientFunds { .. })
        ));
        // Nothing was reserved by the failed attempts
        assert_eq!(fx.shops.get(&shop_id).await.unwrap().filled_slots, 0);

        fx.shops.set_status(&shop_id, ShopStatus::Inactive).await.unwrap();
        assert!(matches!(
            fx.investments.open("u1", &shop_id, 2_000).await,
            Err(Error::ShopNotActive { .. })
        ));
    }

    #[tokio::test]
    async fn test_open_compensates_when_term_ends_out_of_range() {
        let fx = fixture_at(NaiveDate::MAX - chrono::Duration::days(5));
        let shop_id = shop(&fx, 1);
        fund(&fx, "u1", 20_000).await;

        assert!(matches!(
            fx.investments.open("u1", &shop_id, 10_000).await,
            Err(Error::Validation(_))
        ));

        let shop = fx.shops.get(&shop_id).await.unwrap();
        assert_eq!(shop.filled_slots, 0);
        assert_eq!(shop.status, ShopStatus::Active);

        let balances = fx.wallets.balances("u1").await.unwrap();
        assert_eq!(balances.main, 20_000);
        assert_eq!(balances.investment, 0);
        assert!(fx.wallets.reconcile("u1").await.unwrap().is_empty());

        let totals = crate::analytics::totals_by_category(
            fx.wallets.ledger(),
            "u1",
            crate::analytics::DateRange::all(),
        );
        assert_eq!(totals[&Category::Investment], 0);
        assert_eq!(totals[&Category::Deposit], 20_000);
        assert!(fx.investments.list_for("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shop_terms_are_snapshotted() {
        let fx = fixture();
        let shop_id = shop(&fx, 3);
        fund(&fx, "u1", 10_000).await;

        let inv = fx.investments.open("u1", &shop_id, 10_000).await.unwrap();
        fx.shops.set_status(&shop_id, ShopStatus::Closed).await.unwrap();

        let reloaded = fx.investments.get(&inv.id).await.unwrap();
        assert_eq!(reloaded.daily_percent_bps, 150);
        assert_eq!(reloaded.duration_days, 10);
    }

    #[tokio::test]
    async fn test_accrue_day_is_idempotent() {
        let fx = fixture();
        let shop_id = shop(&fx, 5);
        fund(&fx, "u1", 10_000).await;
        let inv = fx.investments.open("u1", &shop_id, 10_000).await.unwrap();

        let day_one = inv.start_date + chrono::Duration::days(1);
        let first = fx.investments.accrue_day(&inv.id, day_one).await.unwrap();
        let second = fx.investments.accrue_day(&inv.id, day_one).await.unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(
            fx.wallets.current_balance("u1", WalletKind::Profit).await.unwrap(),
            150
        );
    }

    #[tokio::test]
    async fn test_accrue_day_past_end_credits_remaining_term() {
        let fx = fixture();
        let shop_id = shop(&fx, 5);
        fund(&fx, "u1", 10_000).await;
        let inv = fx.investments.open("u1", &shop_id, 10_000).await.unwrap();

        let late = inv.end_date + chrono::Duration::days(5);
        let entries = fx.investments.accrue_day(&inv.id, late).await.unwrap();
        assert_eq!(entries.len(), 10);
        assert_eq!(
            fx.wallets.current_balance("u1", WalletKind::Profit).await.unwrap(),
            1_500
        );
        assert!(fx.investments.accrue_day(&inv.id, late).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_accrual_never_exceeds_duration() {
        let fx = fixture();
        let shop_id = shop(&fx, 5);
        fund(&fx, "u1", 10_000).await;
        let inv = fx.investments.open("u1", &shop_id, 10_000).await.unwrap();

        let late = inv.end_date + chrono::Duration::days(20);
        let report = fx.investments.accrue_daily(late).await.unwrap();
        assert_eq!(report.days_accrued, 10);
        assert_eq!(report.profit_credited, 1_500);

        let again = fx.investments.accrue_daily(late).await.unwrap();
        assert_eq!(again.days_accrued, 0);

        let inv = fx.investments.get(&inv.id).await.unwrap();
        assert_eq!(inv.accrued_profit, inv.expected_profit());
    }

    #[tokio::test]
    async fn test_maturity_accrues_then_flips_once() {
        let fx = fixture();
        let shop_id = shop(&fx, 5);
        fund(&fx, "u1", 10_000).await;
        let inv = fx.investments.open("u1", &shop_id, 10_000).await.unwrap();

        let before_end = inv.end_date - chrono::Duration::days(1);
        assert!(fx.investments.maturity_check(before_end).await.unwrap().is_empty());

        fx.clock.advance_days(10);
        let matured = fx.investments.maturity_check(inv.end_date).await.unwrap();
        assert_eq!(matured, vec![inv.id]);
        assert!(fx.investments.maturity_check(inv.end_date).await.unwrap().is_empty());

        let inv = fx.investments.get(&inv.id).await.unwrap();
        assert_eq!(inv.status, InvestmentStatus::Matured);
        assert_eq!(inv.accrued_days, 10);
        assert!(fx.investments.is_capital_eligible(&inv, inv.end_date));

        // Capital stays locked until withdrawn
        assert_eq!(
            fx.wallets.current_balance("u1", WalletKind::Investment).await.unwrap(),
            10_000
        );
    }

    #[tokio::test]
    async fn test_run_daily_reports() {
        let fx = fixture();
        let shop_id = shop(&fx, 5);
        fund(&fx, "u1", 30_000).await;
        fx.investments.open("u1", &shop_id, 10_000).await.unwrap();
        fx.investments.open("u1", &shop_id, 20_000).await.unwrap();

        let today = fx.clock.today() + chrono::Duration::days(3);
        let report = fx.investments.run_daily(today).await.unwrap();
        assert_eq!(report.investments, 2);
        assert_eq!(report.days_accrued, 6);
        assert_eq!(report.profit_credited, 3 * 150 + 3 * 300);
        assert!(report.matured.is_empty());

        assert_eq!(fx.investments.list_for("u1").await.unwrap().len(), 2);
    }
}
