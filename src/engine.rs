//! Engine facade
//!
//! Wires the ledger, wallets, shops, investments, request processor and
//! deposits together and exposes the operations the API layer calls.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::analytics::{self, AnalyticsSummary, DateRange};
use crate::clock::Clock;
use crate::config::Config;
use crate::deposit::{DepositIntent, DepositManager, DepositStatus};
use crate::error::{Error, Result};
use crate::external::{KycProvider, PaymentGateway, PayoutMethod, SettlementOutcome};
use crate::investment::{AccrualReport, Investment, InvestmentId, InvestmentManager};
use crate::ledger::{Category, EntryStatus, LedgerEntry, LedgerStore, WalletKind};
use crate::processor::{
    FeeQuote, FeeSchedule, RequestId, RequestProcessor, RequestStatus, TransferForm,
    TransferOrder, TransferRequest, TransferTarget, WithdrawalForm, WithdrawalKind,
    WithdrawalOrder, WithdrawalRequest,
};
use crate::settings::{SettingsSnapshot, SettingsStore};
use crate::shop::{NewShop, Reservation, Shop, ShopCapacityManager, ShopId, ShopStatus};
use crate::wallet::{BalanceMismatch, WalletBalances, WalletManager};

/// Snapshot format written by [`Engine::save_to`]
const SNAPSHOT_FORMAT: u32 = 1;

/// Services the engine consumes but does not own
#[derive(Clone)]
pub struct Collaborators {
    pub settings: Arc<dyn SettingsStore>,
    pub kyc: Arc<dyn KycProvider>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub clock: Arc<dyn Clock>,
}

/// Filter for [`Engine::list_transactions`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub wallet: Option<WalletKind>,
    pub category: Option<Category>,
    pub status: Option<EntryStatus>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl TransactionFilter {
    fn matches(&self, entry: &LedgerEntry) -> bool {
        self.wallet.map_or(true, |w| w == entry.wallet)
            && self.category.map_or(true, |c| c == entry.category)
            && self.status.map_or(true, |s| s == entry.status)
    }
}

/// Requests waiting on an admin or the gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingRequests {
    pub withdrawals: Vec<WithdrawalRequest>,
    pub transfers: Vec<TransferRequest>,
    pub deposits: Vec<DepositIntent>,
}

/// Serializable engine state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub format: u32,
    pub taken_at: DateTime<Utc>,
    pub ledger: Vec<LedgerEntry>,
    pub shops: Vec<Shop>,
    pub reservations: Vec<Reservation>,
    pub investments: Vec<Investment>,
    pub withdrawals: Vec<WithdrawalRequest>,
    pub transfers: Vec<TransferRequest>,
    pub deposits: Vec<DepositIntent>,
}

pub struct Engine {
    ledger: Arc<LedgerStore>,
    wallets: Arc<WalletManager>,
    shops: Arc<ShopCapacityManager>,
    investments: Arc<InvestmentManager>,
    requests: RequestProcessor,
    deposits: DepositManager,
    settings: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(config: &Config, collaborators: Collaborators) -> Self {
        let Collaborators {
            settings,
            kyc,
            gateway,
            clock,
        } = collaborators;
        let timeout = Duration::from_millis(config.engine.lock_timeout_ms);

        let ledger = Arc::new(LedgerStore::new(Arc::clone(&clock)));
        let wallets = Arc::new(WalletManager::new(Arc::clone(&ledger), timeout));
        let shops = Arc::new(ShopCapacityManager::new(Arc::clone(&clock), timeout));
        let investments = Arc::new(InvestmentManager::new(
            Arc::clone(&wallets),
            Arc::clone(&shops),
            Arc::clone(&clock),
            timeout,
        ));
        let requests = RequestProcessor::new(
            Arc::clone(&wallets),
            Arc::clone(&investments),
            Arc::clone(&settings),
            kyc,
            Arc::clone(&gateway),
            Arc::clone(&clock),
            config.payout.clone(),
            timeout,
        );
        let deposits =
            DepositManager::new(Arc::clone(&wallets), gateway, Arc::clone(&clock), timeout);

        Self {
            ledger,
            wallets,
            shops,
            investments,
            requests,
            deposits,
            settings,
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub async fn settings(&self) -> Result<SettingsSnapshot> {
        self.settings.snapshot().await
    }

    // Wallets

    pub async fn get_wallet_balances(&self, user: &str) -> Result<WalletBalances> {
        self.wallets.balances(user).await
    }

    /// Manual adjustment by an operator
    pub async fn admin_credit(&self, user: &str, kind: WalletKind, amount: u64) -> Result<LedgerEntry> {
        let entry = self
            .wallets
            .credit(user, kind, amount, Category::Deposit, None)
            .await?;
        info!("Admin credit of {} to {} {} wallet", amount, user, kind);
        Ok(entry)
    }

    pub async fn reconcile(&self, user: &str) -> Result<Vec<BalanceMismatch>> {
        self.wallets.reconcile(user).await
    }

    /// Ledger entries for one user, newest first
    pub fn list_transactions(&self, user: &str, filter: &TransactionFilter) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self
            .ledger
            .scan(user, filter.since, filter.until)
            .filter(|e| filter.matches(e))
            .collect();
        entries.reverse();
        if let Some(limit) = filter.limit {
            entries.truncate(limit);
        }
        entries
    }

    // Deposits

    pub async fn initiate_deposit(&self, user: &str, amount: u64) -> Result<DepositIntent> {
        self.deposits.initiate(user, amount).await
    }

    pub async fn on_deposit_settled(
        &self,
        intent_id: &str,
        outcome: SettlementOutcome,
    ) -> Result<DepositIntent> {
        self.deposits.on_settled(intent_id, outcome).await
    }

    pub async fn list_deposits(&self, user: &str) -> Result<Vec<DepositIntent>> {
        self.deposits.list_for(Some(user)).await
    }

    // Shops

    /// Create a shop; a missing rate falls back to the current default profit rate
    pub async fn create_shop(&self, new: NewShop) -> Result<Shop> {
        let settings = self.settings.snapshot().await?;
        self.shops.create_shop(new, settings.default_profit_bps)
    }

    pub async fn set_shop_status(&self, shop_id: &ShopId, status: ShopStatus) -> Result<Shop> {
        self.shops.set_status(shop_id, status).await
    }

    pub async fn get_shop(&self, shop_id: &ShopId) -> Result<Shop> {
        self.shops.get(shop_id).await
    }

    pub async fn list_shops(&self) -> Result<Vec<Shop>> {
        self.shops.list().await
    }

    // Investments

    pub async fn open_investment(&self, user: &str, shop_id: &ShopId, amount: u64) -> Result<Investment> {
        self.investments.open(user, shop_id, amount).await
    }

    pub async fn list_investments(&self, user: &str) -> Result<Vec<Investment>> {
        self.investments.list_for(user).await
    }

    pub async fn get_investment(&self, id: &InvestmentId) -> Result<Investment> {
        self.investments.get(id).await
    }

    pub async fn is_capital_eligible(&self, id: &InvestmentId) -> Result<bool> {
        let investment = self.investments.get(id).await?;
        Ok(self
            .investments
            .is_capital_eligible(&investment, self.clock.today()))
    }

    pub async fn accrue_day(&self, id: &InvestmentId, date: NaiveDate) -> Result<Vec<LedgerEntry>> {
        self.investments.accrue_day(id, date).await
    }

    pub async fn accrue_daily(&self) -> Result<AccrualReport> {
        self.investments.accrue_daily(self.clock.today()).await
    }

    pub async fn maturity_check(&self) -> Result<Vec<InvestmentId>> {
        self.investments.maturity_check(self.clock.today()).await
    }

    pub async fn refresh_investment(&self, id: &InvestmentId) -> Result<Investment> {
        self.investments.refresh(id, self.clock.today()).await
    }

    /// Accrual and maturity for every investment as of today
    pub async fn run_daily(&self) -> Result<AccrualReport> {
        self.investments.run_daily(self.clock.today()).await
    }

    // Withdrawals

    pub async fn quote_withdrawal(&self, amount: u64) -> Result<FeeQuote> {
        FeeSchedule::from(&self.settings.snapshot().await?).withdrawal(amount)
    }

    pub async fn request_withdrawal(
        &self,
        user: &str,
        kind: WithdrawalKind,
        amount: u64,
        method: PayoutMethod,
    ) -> Result<WithdrawalRequest> {
        self.requests
            .request_withdrawal(user, kind, amount, method)
            .await
    }

    pub async fn submit_withdrawal_form(
        &self,
        user: &str,
        form: WithdrawalForm,
    ) -> Result<WithdrawalRequest> {
        let order = WithdrawalOrder::try_from(form)?;
        self.request_withdrawal(user, order.kind, order.amount, order.method)
            .await
    }

    pub async fn approve_withdrawal(&self, id: &RequestId) -> Result<WithdrawalRequest> {
        self.requests.approve_withdrawal(id).await
    }

    pub async fn reject_withdrawal(&self, id: &RequestId, reason: &str) -> Result<WithdrawalRequest> {
        self.requests.reject_withdrawal(id, reason).await
    }

    pub async fn cancel_withdrawal(&self, id: &RequestId) -> Result<WithdrawalRequest> {
        self.requests.cancel_withdrawal(id).await
    }

    pub async fn on_settlement_callback(
        &self,
        id: &RequestId,
        outcome: SettlementOutcome,
    ) -> Result<WithdrawalRequest> {
        self.requests.on_settlement_callback(id, outcome).await
    }

    pub async fn list_withdrawals(&self, user: &str) -> Result<Vec<WithdrawalRequest>> {
        self.requests.withdrawals_for(Some(user)).await
    }

    // Transfers

    pub async fn quote_transfer(&self, amount: u64) -> Result<FeeQuote> {
        FeeSchedule::from(&self.settings.snapshot().await?).transfer(amount)
    }

    pub async fn request_transfer(
        &self,
        user: &str,
        target: TransferTarget,
        amount: u64,
    ) -> Result<TransferRequest> {
        self.requests.request_transfer(user, target, amount).await
    }

    pub async fn submit_transfer_form(&self, user: &str, form: TransferForm) -> Result<TransferRequest> {
        let order = TransferOrder::try_from(form)?;
        self.request_transfer(user, order.target, order.amount).await
    }

    pub async fn approve_transfer(&self, id: &RequestId) -> Result<TransferRequest> {
        self.requests.approve_transfer(id).await
    }

    pub async fn reject_transfer(&self, id: &RequestId, reason: &str) -> Result<TransferRequest> {
        self.requests.reject_transfer(id, reason).await
    }

    pub async fn cancel_transfer(&self, id: &RequestId) -> Result<TransferRequest> {
        self.requests.cancel_transfer(id).await
    }

    pub async fn list_transfers(&self, user: &str) -> Result<Vec<TransferRequest>> {
        self.requests.transfers_for(Some(user)).await
    }

    /// Everything an admin still has to act on
    pub async fn pending_requests(&self) -> Result<PendingRequests> {
        let (withdrawals, transfers) = self.requests.export().await?;
        Ok(PendingRequests {
            withdrawals: withdrawals
                .into_iter()
                .filter(|r| !r.status.is_terminal())
                .collect(),
            transfers: transfers
                .into_iter()
                .filter(|r| r.status == RequestStatus::Pending)
                .collect(),
            deposits: self
                .deposits
                .list_for(None)
                .await?
                .into_iter()
                .filter(|d| d.status == DepositStatus::Pending)
                .collect(),
        })
    }

    // Analytics

    pub fn totals_by_category(
        &self,
        user: &str,
        range: DateRange,
    ) -> std::collections::BTreeMap<Category, i64> {
        analytics::totals_by_category(&self.ledger, user, range)
    }

    pub fn net_flow(&self, user: &str, range: DateRange) -> i64 {
        analytics::net_flow(&self.ledger, user, range)
    }

    pub fn get_analytics_summary(&self, user: &str, range: DateRange) -> AnalyticsSummary {
        analytics::summarize(&self.ledger, user, range)
    }

    // Persistence

    pub async fn snapshot(&self) -> Result<EngineSnapshot> {
        let (shops, reservations) = self.shops.export().await?;
        let (withdrawals, transfers) = self.requests.export().await?;
        Ok(EngineSnapshot {
            format: SNAPSHOT_FORMAT,
            taken_at: self.clock.now(),
            ledger: self.ledger.export(),
            shops,
            reservations,
            investments: self.investments.export().await?,
            withdrawals,
            transfers,
            deposits: self.deposits.list_for(None).await?,
        })
    }

    /// Rebuild an engine; balances come from replaying the ledger
    pub fn restore(
        config: &Config,
        collaborators: Collaborators,
        snapshot: EngineSnapshot,
    ) -> Result<Self> {
        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(Error::Persistence(format!(
                "unsupported snapshot format {}",
                snapshot.format
            )));
        }

        let engine = Self::new(config, collaborators);
        let entries = snapshot.ledger.len();
        engine.ledger.import(snapshot.ledger)?;
        let users = engine.wallets.rebuild_from_ledger()?;
        engine.shops.import(snapshot.shops, snapshot.reservations)?;
        engine.investments.import(snapshot.investments)?;
        engine
            .requests
            .import(snapshot.withdrawals, snapshot.transfers)?;
        engine.deposits.import(snapshot.deposits)?;

        info!(
            "Restored engine from snapshot taken {}: {} entries, {} users",
            snapshot.taken_at, entries, users
        );
        Ok(engine)
    }

    pub async fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = serde_json::to_string_pretty(&self.snapshot().await?)?;
        tokio::fs::write(path, data)
            .await
            .map_err(|e| Error::Persistence(format!("{}: {}", path.display(), e)))?;
        debug!("Saved engine state to {}", path.display());
        Ok(())
    }

    pub async fn load_from(
        path: impl AsRef<Path>,
        config: &Config,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Persistence(format!("{}: {}", path.display(), e)))?;
        let snapshot: EngineSnapshot = serde_json::from_str(&data)?;
        Self::restore(config, collaborators, snapshot)
    }
}
