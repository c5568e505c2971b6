//! Withdrawal and transfer processor
//!
//! Every request runs the same gate in a fixed order: maintenance mode, KYC,
//! amount bounds, kind-specific checks, fee. The gross amount is debited when
//! the request is accepted; rejection, cancellation or a failed settlement
//! appends a compensating credit for the gross amount.
//!
//! Lock order: request → investment → wallet. Payout submission runs with no
//! lock held.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::{future::retry, ExponentialBackoff};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::PayoutConfig;
use crate::error::{Error, Result};
use crate::external::{
    KycProvider, KycStatus, PaymentGateway, PayoutInstruction, PayoutMethod, SettlementOutcome,
};
use crate::investment::InvestmentManager;
use crate::ledger::{Category, EntryId, LedgerEntry, WalletKind};
use crate::settings::{SettingsSnapshot, SettingsStore};
use crate::sync::LockTable;
use crate::wallet::WalletManager;

use super::fees::FeeSchedule;
use super::types::{
    RequestId, RequestStatus, TransferRequest, TransferTarget, WithdrawalKind, WithdrawalRequest,
};

/// Validates and executes withdrawals and transfers
pub struct RequestProcessor {
    withdrawals: LockTable<RequestId, WithdrawalRequest>,
    transfers: LockTable<RequestId, TransferRequest>,
    wallets: Arc<WalletManager>,
    investments: Arc<InvestmentManager>,
    settings: Arc<dyn SettingsStore>,
    kyc: Arc<dyn KycProvider>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    payout: PayoutConfig,
}

impl RequestProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        wallets: Arc<WalletManager>,
        investments: Arc<InvestmentManager>,
        settings: Arc<dyn SettingsStore>,
        kyc: Arc<dyn KycProvider>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        payout: PayoutConfig,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            withdrawals: LockTable::new("withdrawal", lock_timeout),
            transfers: LockTable::new("transfer", lock_timeout),
            wallets,
            investments,
            settings,
            kyc,
            gateway,
            clock,
            payout,
        }
    }

    /// Maintenance, KYC and bounds, in that order
    async fn gate(&self, owner: &str, amount: u64) -> Result<SettingsSnapshot> {
        let settings = self.settings.snapshot().await?;

        if settings.maintenance_mode {
            debug!("Rejected request from {}: maintenance mode", owner);
            return Err(Error::SystemUnavailable);
        }

        let kyc = self.kyc.kyc_status(owner).await?;
        if kyc != KycStatus::Approved {
            debug!("Rejected request from {}: KYC {}", owner, kyc);
            return Err(Error::KycRequired(kyc.to_string()));
        }

        if amount < settings.min_withdrawal {
            return Err(Error::BelowMinimum {
                amount,
                min: settings.min_withdrawal,
            });
        }
        if amount > settings.max_withdrawal {
            return Err(Error::AboveMaximum {
                amount,
                max: settings.max_withdrawal,
            });
        }

        Ok(settings)
    }

    /// Validate a withdrawal, debit the gross amount and record it as Pending
    pub async fn request_withdrawal(
        &self,
        owner: &str,
        kind: WithdrawalKind,
        amount: u64,
        method: PayoutMethod,
    ) -> Result<WithdrawalRequest> {
        let settings = self.gate(owner, amount).await?;
        let quote = FeeSchedule::from(&settings).withdrawal(amount)?;
        let id = Uuid::new_v4();

        let debit = match kind {
            WithdrawalKind::Profit => {
                self.wallets
                    .debit(owner, WalletKind::Profit, amount, Category::Withdrawal, Some(id))
                    .await?
            }
            WithdrawalKind::Capital { investment_id } => {
                self.debit_capital(owner, investment_id, id, amount).await?
            }
        };

        let now = self.clock.now();
        let request = WithdrawalRequest {
            id,
            owner: owner.to_string(),
            kind,
            amount,
            fee: quote.fee,
            net_amount: quote.net,
            method,
            status: RequestStatus::Pending,
            settings,
            debit_entry: debit.id,
            payout_reference: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        self.withdrawals.insert(id, request.clone());

        info!(
            "Withdrawal {} requested by {}: {} {} (fee {}, net {}) via {}",
            id, owner, kind, amount, quote.fee, quote.net, method
        );
        Ok(request)
    }

    async fn debit_capital(
        &self,
        owner: &str,
        investment_id: Uuid,
        request_id: RequestId,
        amount: u64,
    ) -> Result<LedgerEntry> {
        let today = self.clock.today();
        let mut investment = self.investments.lock(&investment_id).await?;
        if investment.owner != owner {
            return Err(Error::NotFound(format!("investment {}", investment_id)));
        }

        // Catch up on accrual and maturity before judging eligibility
        self.investments
            .refresh_locked(&mut investment, today)
            .await?;
        self.investments
            .begin_capital_withdrawal(&mut investment, request_id, amount, today)?;

        let debit = self
            .wallets
            .debit(
                owner,
                WalletKind::Investment,
                amount,
                Category::Withdrawal,
                Some(request_id),
            )
            .await;

        if debit.is_err() {
            self.investments
                .abort_capital_withdrawal(&mut investment, request_id);
        }
        debit
    }

    /// Hand a pending withdrawal to the payout gateway
    ///
    /// A payout the gateway refuses after retries fails the request and
    /// refunds the gross amount. If that refund cannot be written the request
    /// stays Approved and a later failed settlement retries it.
    pub async fn approve_withdrawal(&self, id: &RequestId) -> Result<WithdrawalRequest> {
        let instruction = {
            let mut request = self.withdrawals.lock(id).await?;
            expect_status(request.status, RequestStatus::Pending, id)?;
            request.status = RequestStatus::Approved;
            request.updated_at = self.clock.now();
            info!("Withdrawal {} approved, submitting payout", id);
            PayoutInstruction {
                request_id: request.id,
                owner: request.owner.clone(),
                net_amount: request.net_amount,
                method: request.method,
            }
        };

        match self.submit_payout(&instruction).await {
            Ok(reference) => {
                let mut request = self.withdrawals.lock(id).await?;
                if request.status == RequestStatus::Approved {
                    request.payout_reference = Some(reference);
                    request.updated_at = self.clock.now();
                }
                Ok(request.clone())
            }
            Err(e) => {
                error!("Payout for withdrawal {} failed: {}", id, e);
                if let Err(refund) = self
                    .on_settlement_callback(id, SettlementOutcome::failed(e.to_string()))
                    .await
                {
                    error!(
                        "Refund for withdrawal {} failed, request left approved: {}",
                        id, refund
                    );
                    return Err(Error::ExternalSettlement(format!(
                        "{}; refund failed: {}",
                        e, refund
                    )));
                }
                Err(Error::ExternalSettlement(e.to_string()))
            }
        }
    }

    async fn submit_payout(&self, payout: &PayoutInstruction) -> Result<String> {
        let base = self.payout.retry_base_delay_ms.max(1);
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(base),
            max_interval: Duration::from_millis(base * 8),
            max_elapsed_time: None,
            ..Default::default()
        };

        let max_attempts = self.payout.retry_attempts.max(1);
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let gateway = &self.gateway;

        retry(backoff, || async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            match gateway.submit_payout(payout).await {
                Ok(reference) => Ok(reference),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        "Retryable payout error for {} (attempt {}/{}): {}",
                        payout.request_id, attempt, max_attempts, e
                    );
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await
    }

    /// Settlement result from the payout gateway
    ///
    /// Idempotent per request id: a repeated outcome is a no-op, a conflicting
    /// outcome for an already settled request is rejected.
    pub async fn on_settlement_callback(
        &self,
        id: &RequestId,
        outcome: SettlementOutcome,
    ) -> Result<WithdrawalRequest> {
        let mut request = self.withdrawals.lock(id).await?;

        match (request.status, outcome.is_success()) {
            (RequestStatus::Completed, true) | (RequestStatus::Failed, false) => {
                debug!("Duplicate settlement for {} ignored", id);
                return Ok(request.clone());
            }
            (RequestStatus::Pending | RequestStatus::Approved, _) => {}
            (status, _) => {
                return Err(Error::Validation(format!(
                    "withdrawal {} is already {}, cannot settle as {}",
                    id, status, outcome
                )));
            }
        }

        match outcome {
            SettlementOutcome::Succeeded => {
                if let WithdrawalKind::Capital { investment_id } = request.kind {
                    let mut investment = self.investments.lock(&investment_id).await?;
                    self.investments
                        .complete_capital_withdrawal(&mut investment, request.id);
                }
                request.status = RequestStatus::Completed;
                info!(
                    "Withdrawal {} completed: {} paid to {}",
                    id, request.net_amount, request.owner
                );
            }
            SettlementOutcome::Failed { reason } => {
                self.refund_withdrawal(&request).await?;
                request.status = RequestStatus::Failed;
                request.failure_reason = Some(reason);
                warn!("Withdrawal {} failed, {} refunded", id, request.amount);
            }
        }

        request.updated_at = self.clock.now();
        Ok(request.clone())
    }

    pub async fn reject_withdrawal(&self, id: &RequestId, reason: &str) -> Result<WithdrawalRequest> {
        self.close_withdrawal(id, RequestStatus::Rejected, reason).await
    }

    pub async fn cancel_withdrawal(&self, id: &RequestId) -> Result<WithdrawalRequest> {
        self.close_withdrawal(id, RequestStatus::Cancelled, "cancelled").await
    }

    async fn close_withdrawal(
        &self,
        id: &RequestId,
        status: RequestStatus,
        reason: &str,
    ) -> Result<WithdrawalRequest> {
        let mut request = self.withdrawals.lock(id).await?;
        expect_status(request.status, RequestStatus::Pending, id)?;

        self.refund_withdrawal(&request).await?;
        request.status = status;
        request.failure_reason = Some(reason.to_string());
        request.updated_at = self.clock.now();

        info!("Withdrawal {} {}: {} refunded", id, status, request.amount);
        Ok(request.clone())
    }

    /// Compensating credit for the gross debit; fee included
    async fn refund_withdrawal(&self, request: &WithdrawalRequest) -> Result<LedgerEntry> {
        if let Some(investment_id) = request.kind.investment_id() {
            let mut investment = self.investments.lock(&investment_id).await?;
            self.investments
                .abort_capital_withdrawal(&mut investment, request.id);
        }
        self.compensate(&request.owner, &request.debit_entry).await
    }

    /// Validate a transfer, debit the gross amount and record it as Pending
    pub async fn request_transfer(
        &self,
        owner: &str,
        target: TransferTarget,
        amount: u64,
    ) -> Result<TransferRequest> {
        let settings = self.gate(owner, amount).await?;

        match &target {
            TransferTarget::Wallet { from, to } => {
                if from == to {
                    return Err(Error::Validation(format!(
                        "cannot transfer from {} to itself",
                        from
                    )));
                }
                if !from.is_transferable() || !to.is_transferable() {
                    return Err(Error::Validation(
                        "the investment wallet cannot be a transfer endpoint".to_string(),
                    ));
                }
            }
            TransferTarget::User { to_user } => {
                if to_user.trim().is_empty() || to_user == owner {
                    return Err(Error::Validation(format!(
                        "invalid transfer recipient: {:?}",
                        to_user
                    )));
                }
            }
        }

        let quote = FeeSchedule::from(&settings).transfer(amount)?;
        let id = Uuid::new_v4();
        let source = target.source_wallet();

        let debit = self
            .wallets
            .debit(owner, source, amount, Category::Transfer, Some(id))
            .await?;

        let now = self.clock.now();
        let request = TransferRequest {
            id,
            owner: owner.to_string(),
            target,
            amount,
            fee: quote.fee,
            net_amount: quote.net,
            status: RequestStatus::Pending,
            settings,
            debit_entry: debit.id,
            credit_entry: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        self.transfers.insert(id, request.clone());

        info!(
            "Transfer {} requested by {}: {} {} (fee {}, net {})",
            id, owner, request.target, amount, quote.fee, quote.net
        );
        Ok(request)
    }

    /// Credit the destination with the net amount
    pub async fn approve_transfer(&self, id: &RequestId) -> Result<TransferRequest> {
        let mut request = self.transfers.lock(id).await?;
        expect_status(request.status, RequestStatus::Pending, id)?;

        let (recipient, kind) = request.target.destination(&request.owner);
        let credit = self
            .wallets
            .lock(&recipient)
            .await?
            .credit(kind, request.net_amount, Category::Transfer, Some(request.id))?;

        request.credit_entry = Some(credit.id);
        request.status = RequestStatus::Completed;
        request.updated_at = self.clock.now();

        info!(
            "Transfer {} completed: {} to {} {}",
            id, request.net_amount, recipient, kind
        );
        Ok(request.clone())
    }

    pub async fn reject_transfer(&self, id: &RequestId, reason: &str) -> Result<TransferRequest> {
        self.close_transfer(id, RequestStatus::Rejected, reason).await
    }

    pub async fn cancel_transfer(&self, id: &RequestId) -> Result<TransferRequest> {
        self.close_transfer(id, RequestStatus::Cancelled, "cancelled").await
    }

    async fn close_transfer(
        &self,
        id: &RequestId,
        status: RequestStatus,
        reason: &str,
    ) -> Result<TransferRequest> {
        let mut request = self.transfers.lock(id).await?;
        expect_status(request.status, RequestStatus::Pending, id)?;

        self.compensate(&request.owner, &request.debit_entry).await?;
        request.status = status;
        request.failure_reason = Some(reason.to_string());
        request.updated_at = self.clock.now();

        info!("Transfer {} {}: {} refunded", id, status, request.amount);
        Ok(request.clone())
    }

    async fn compensate(&self, owner: &str, entry_id: &EntryId) -> Result<LedgerEntry> {
        let entry = self
            .wallets
            .ledger()
            .get(owner, entry_id)
            .ok_or_else(|| Error::Persistence(format!("ledger entry {} missing", entry_id)))?;
        self.wallets.lock(owner).await?.compensate(&entry)
    }

    pub async fn withdrawal(&self, id: &RequestId) -> Result<WithdrawalRequest> {
        self.withdrawals.read(id).await
    }

    pub async fn transfer(&self, id: &RequestId) -> Result<TransferRequest> {
        self.transfers.read(id).await
    }

    /// Withdrawals, newest first; `None` lists every owner
    pub async fn withdrawals_for(&self, owner: Option<&str>) -> Result<Vec<WithdrawalRequest>> {
        let mut out: Vec<_> = self
            .withdrawals
            .values()
            .await?
            .into_iter()
            .filter(|r| owner.map_or(true, |o| r.owner == o))
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    /// Transfers sent or received, newest first; `None` lists every owner
    pub async fn transfers_for(&self, owner: Option<&str>) -> Result<Vec<TransferRequest>> {
        let mut out: Vec<_> = self
            .transfers
            .values()
            .await?
            .into_iter()
            .filter(|r| {
                owner.map_or(true, |o| {
                    r.owner == o || matches!(&r.target, TransferTarget::User { to_user } if to_user == o)
                })
            })
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    pub async fn export(&self) -> Result<(Vec<WithdrawalRequest>, Vec<TransferRequest>)> {
        Ok((
            self.withdrawals_for(None).await?,
            self.transfers_for(None).await?,
        ))
    }

    pub fn import(
        &self,
        withdrawals: Vec<WithdrawalRequest>,
        transfers: Vec<TransferRequest>,
    ) -> Result<()> {
        for request in withdrawals {
            let id = request.id;
            if !self.withdrawals.insert(id, request) {
                return Err(Error::Persistence(format!("duplicate withdrawal {}", id)));
            }
        }
        for request in transfers {
            let id = request.id;
            if !self.transfers.insert(id, request) {
                return Err(Error::Persistence(format!("duplicate transfer {}", id)));
            }
        }
        Ok(())
    }
}

fn expect_status(actual: RequestStatus, expected: RequestStatus, id: &RequestId) -> Result<()> {
    if actual != expected {
        return Err(Error::Validation(format!(
            "request {} is {}, expected {}",
            id, actual, expected
        )));
    }
    Ok(())
}
