//! External collaborators
//!
//! KYC status lookup and the payment gateway sit outside the engine. The
//! engine only sees these traits; the in-memory implementations back the CLI
//! and tests.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::ledger::UserId;

/// Verification state reported by the KYC service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycStatus {
    #[default]
    NotSubmitted,
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for KycStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KycStatus::NotSubmitted => write!(f, "not_submitted"),
            KycStatus::Pending => write!(f, "pending"),
            KycStatus::Approved => write!(f, "approved"),
            KycStatus::Rejected => write!(f, "rejected"),
        }
    }
}

impl FromStr for KycStatus {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "not_submitted" | "none" => Ok(KycStatus::NotSubmitted),
            "pending" => Ok(KycStatus::Pending),
            "approved" => Ok(KycStatus::Approved),
            "rejected" => Ok(KycStatus::Rejected),
            other => Err(Error::Validation(format!("unknown KYC status: {}", other))),
        }
    }
}

/// Auth/KYC service
#[async_trait]
pub trait KycProvider: Send + Sync {
    async fn kyc_status(&self, user: &str) -> Result<KycStatus>;
}

/// KYC statuses held in memory; unknown users are `NotSubmitted`
#[derive(Debug, Default)]
pub struct InMemoryKyc {
    statuses: DashMap<UserId, KycStatus>,
}

impl InMemoryKyc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, user: &str, status: KycStatus) {
        info!("KYC status for {} set to {}", user, status);
        self.statuses.insert(user.to_string(), status);
    }

    pub fn export(&self) -> BTreeMap<UserId, KycStatus> {
        self.statuses
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    pub fn from_map(statuses: BTreeMap<UserId, KycStatus>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
        }
    }
}

#[async_trait]
impl KycProvider for InMemoryKyc {
    async fn kyc_status(&self, user: &str) -> Result<KycStatus> {
        Ok(self
            .statuses
            .get(user)
            .map(|s| *s.value())
            .unwrap_or_default())
    }
}

/// Where a withdrawal is paid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutMethod {
    VelvPay,
    Bank,
}

impl std::fmt::Display for PayoutMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayoutMethod::VelvPay => write!(f, "velvpay"),
            PayoutMethod::Bank => write!(f, "bank"),
        }
    }
}

impl FromStr for PayoutMethod {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "velvpay" => Ok(PayoutMethod::VelvPay),
            "bank" | "banktransfer" => Ok(PayoutMethod::Bank),
            other => Err(Error::Validation(format!("unknown payout method: {}", other))),
        }
    }
}

/// Result reported by the gateway for a payment or payout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettlementOutcome {
    Succeeded,
    Failed { reason: String },
}

impl SettlementOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        SettlementOutcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SettlementOutcome::Succeeded)
    }
}

impl std::fmt::Display for SettlementOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettlementOutcome::Succeeded => write!(f, "succeeded"),
            SettlementOutcome::Failed { reason } => write!(f, "failed ({})", reason),
        }
    }
}

/// Instruction handed to the gateway once a withdrawal is approved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutInstruction {
    pub request_id: Uuid,
    pub owner: UserId,
    /// Amount actually paid out (gross minus fee)
    pub net_amount: u64,
    pub method: PayoutMethod,
}

/// Payment gateway
///
/// `submit_payout` only queues the payout; completion arrives later through
/// the engine's settlement callback.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a payment intent for an incoming deposit
    async fn create_payment_intent(&self, user: &str, amount: u64) -> Result<String>;

    /// Queue a payout; returns the gateway's reference
    async fn submit_payout(&self, payout: &PayoutInstruction) -> Result<String>;
}

/// Gateway that accepts everything locally
///
/// `fail_next` makes the next submissions fail with a retryable error and
/// `reject_payouts` makes every submission fail permanently.
#[derive(Debug, Default)]
pub struct LocalGateway {
    transient_failures: AtomicU32,
    reject_payouts: AtomicBool,
    submitted: DashMap<Uuid, PayoutInstruction>,
}

impl LocalGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, submissions: u32) {
        self.transient_failures.store(submissions, Ordering::SeqCst);
    }

    pub fn reject_payouts(&self, reject: bool) {
        self.reject_payouts.store(reject, Ordering::SeqCst);
    }

    pub fn submitted(&self, request_id: &Uuid) -> Option<PayoutInstruction> {
        self.submitted.get(request_id).map(|p| p.value().clone())
    }

    pub fn submitted_count(&self) -> usize {
        self.submitted.len()
    }
}

#[async_trait]
impl PaymentGateway for LocalGateway {
    async fn create_payment_intent(&self, user: &str, amount: u64) -> Result<String> {
        let intent = format!("pi_{}", Uuid::new_v4().simple());
        debug!("Created payment intent {} for {} ({})", intent, user, amount);
        Ok(intent)
    }

    async fn submit_payout(&self, payout: &PayoutInstruction) -> Result<String> {
        if self.reject_payouts.load(Ordering::SeqCst) {
            return Err(Error::ExternalSettlement(format!(
                "payout {} rejected by gateway",
                payout.request_id
            )));
        }

        let pending_failures = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending_failures.is_ok() {
            warn!("Local gateway simulating outage for {}", payout.request_id);
            return Err(Error::GatewayUnavailable("simulated outage".to_string()));
        }

        self.submitted.insert(payout.request_id, payout.clone());
        Ok(format!("po_{}", payout.request_id.simple()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payout() -> PayoutInstruction {
        PayoutInstruction {
            request_id: Uuid::new_v4(),
            owner: "u1".to_string(),
            net_amount: 990,
            method: PayoutMethod::Bank,
        }
    }

    #[tokio::test]
    async fn test_unknown_user_has_not_submitted() {
        let kyc = InMemoryKyc::new();
        assert_eq!(kyc.kyc_status("nobody").await.unwrap(), KycStatus::NotSubmitted);
        kyc.set_status("u1", KycStatus::Approved);
        assert_eq!(kyc.kyc_status("u1").await.unwrap(), KycStatus::Approved);
    }

    #[tokio::test]
    async fn test_local_gateway_outage_then_recovery() {
        let gateway = LocalGateway::new();
        gateway.fail_next(1);

        let p = payout();
        let first = gateway.submit_payout(&p).await;
        assert!(matches!(first, Err(ref e) if e.is_retryable()));
        assert!(gateway.submit_payout(&p).await.is_ok());
        assert_eq!(gateway.submitted_count(), 1);
    }

    #[tokio::test]
    async fn test_local_gateway_rejection_is_permanent() {
        let gateway = LocalGateway::new();
        gateway.reject_payouts(true);
        let err = gateway.submit_payout(&payout()).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_parse_method() {
        assert_eq!("VelvPay".parse::<PayoutMethod>().unwrap(), PayoutMethod::VelvPay);
        assert_eq!("bank_transfer".parse::<PayoutMethod>().unwrap(), PayoutMethod::Bank);
        assert!("cash".parse::<PayoutMethod>().is_err());
    }
}
