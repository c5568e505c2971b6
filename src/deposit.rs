//! Deposits through the payment gateway
//!
//! An intent is recorded with a pending ledger entry; the gateway's settlement
//! callback either credits Main or records the failure.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::external::{PaymentGateway, SettlementOutcome};
use crate::ledger::{Category, EntryId, EntryStatus, UserId, WalletKind};
use crate::sync::LockTable;
use crate::wallet::WalletManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    Pending,
    Completed,
    Failed,
}

impl std::fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DepositStatus::Pending => write!(f, "pending"),
            DepositStatus::Completed => write!(f, "completed"),
            DepositStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositIntent {
    /// Correlation id on the deposit's ledger entries
    pub id: Uuid,
    /// Payment intent id issued by the gateway
    pub intent_id: String,
    pub owner: UserId,
    pub amount: u64,
    pub status: DepositStatus,
    pub pending_entry: EntryId,
    pub settled_entry: Option<EntryId>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

pub struct DepositManager {
    intents: LockTable<String, DepositIntent>,
    wallets: Arc<WalletManager>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
}

impl DepositManager {
    pub fn new(
        wallets: Arc<WalletManager>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            intents: LockTable::new("deposit", lock_timeout),
            wallets,
            gateway,
            clock,
        }
    }

    pub async fn initiate(&self, owner: &str, amount: u64) -> Result<DepositIntent> {
        let signed = i64::try_from(amount)
            .ok()
            .filter(|a| *a > 0)
            .ok_or_else(|| Error::Validation(format!("invalid deposit amount {}", amount)))?;

        let intent_id = self.gateway.create_payment_intent(owner, amount).await?;
        let id = Uuid::new_v4();

        let pending = self.wallets.lock(owner).await?.record(
            WalletKind::Main,
            signed,
            Category::Deposit,
            EntryStatus::Pending,
            Some(id),
        )?;

        let intent = DepositIntent {
            id,
            intent_id: intent_id.clone(),
            owner: owner.to_string(),
            amount,
            status: DepositStatus::Pending,
            pending_entry: pending.id,
            settled_entry: None,
            failure_reason: None,
            created_at: self.clock.now(),
            settled_at: None,
        };
        if !self.intents.insert(intent_id.clone(), intent.clone()) {
            return Err(Error::Validation(format!(
                "payment intent {} already recorded",
                intent_id
            )));
        }

        info!("Deposit intent {} for {}: {}", intent_id, owner, amount);
        Ok(intent)
    }

    /// Gateway callback; idempotent per intent
    pub async fn on_settled(
        &self,
        intent_id: &str,
        outcome: SettlementOutcome,
    ) -> Result<DepositIntent> {
        let mut intent = self.intents.lock(&intent_id.to_string()).await?;

        match (intent.status, outcome.is_success()) {
            (DepositStatus::Completed, true) | (DepositStatus::Failed, false) => {
                debug!("Duplicate settlement for deposit {} ignored", intent_id);
                return Ok(intent.clone());
            }
            (DepositStatus::Pending, _) => {}
            (status, _) => {
                return Err(Error::Validation(format!(
                    "deposit {} is already {}, cannot settle as {}",
                    intent_id, status, outcome
                )));
            }
        }

        let mut wallet = self.wallets.lock(&intent.owner).await?;
        match outcome {
            SettlementOutcome::Succeeded => {
                let entry =
                    wallet.credit(WalletKind::Main, intent.amount, Category::Deposit, Some(intent.id))?;
                intent.settled_entry = Some(entry.id);
                intent.status = DepositStatus::Completed;
                info!("Deposit {} settled: {} credited to {}", intent_id, intent.amount, intent.owner);
            }
            SettlementOutcome::Failed { reason } => {
                let amount = i64::try_from(intent.amount)
                    .map_err(|_| Error::Validation(format!("invalid deposit amount {}", intent.amount)))?;
                let entry = wallet.record(
                    WalletKind::Main,
                    amount,
                    Category::Deposit,
                    EntryStatus::Failed,
                    Some(intent.id),
                )?;
                intent.settled_entry = Some(entry.id);
                intent.status = DepositStatus::Failed;
                warn!("Deposit {} failed: {}", intent_id, reason);
                intent.failure_reason = Some(reason);
            }
        }

        intent.settled_at = Some(self.clock.now());
        Ok(intent.clone())
    }

    pub async fn get(&self, intent_id: &str) -> Result<DepositIntent> {
        self.intents.read(&intent_id.to_string()).await
    }

    pub async fn list_for(&self, owner: Option<&str>) -> Result<Vec<DepositIntent>> {
        let mut out: Vec<_> = self
            .intents
            .values()
            .await?
            .into_iter()
            .filter(|d| owner.map_or(true, |o| d.owner == o))
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    pub fn import(&self, intents: Vec<DepositIntent>) -> Result<()> {
        for intent in intents {
            let key = intent.intent_id.clone();
            if !self.intents.insert(key.clone(), intent) {
                return Err(Error::Persistence(format!("duplicate deposit intent {}", key)));
            }
        }
        Ok(())
    }
}
