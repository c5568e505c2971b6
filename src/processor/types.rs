//! Withdrawal and transfer request types
//!
//! Forms arrive loosely typed from the UI and are converted with `TryFrom` into
//! the strict orders the processor accepts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::external::PayoutMethod;
use crate::investment::InvestmentId;
use crate::ledger::{EntryId, UserId, WalletKind};
use crate::settings::SettingsSnapshot;

pub type RequestId = Uuid;

/// What a withdrawal draws from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WithdrawalKind {
    /// Accrued profit from the Profit wallet
    Profit,

    /// Capital of a matured investment, from the Investment wallet
    Capital { investment_id: InvestmentId },
}

impl WithdrawalKind {
    pub fn source_wallet(&self) -> WalletKind {
        match self {
            WithdrawalKind::Profit => WalletKind::Profit,
            WithdrawalKind::Capital { .. } => WalletKind::Investment,
        }
    }

    pub fn investment_id(&self) -> Option<InvestmentId> {
        match self {
            WithdrawalKind::Profit => None,
            WithdrawalKind::Capital { investment_id } => Some(*investment_id),
        }
    }
}

impl std::fmt::Display for WithdrawalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WithdrawalKind::Profit => write!(f, "profit"),
            WithdrawalKind::Capital { investment_id } => write!(f, "capital ({})", investment_id),
        }
    }
}

/// Where a transfer goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum TransferTarget {
    /// Between two of the sender's own wallets
    Wallet { from: WalletKind, to: WalletKind },

    /// Sender's Main wallet to another user's Main wallet
    User { to_user: UserId },
}

impl TransferTarget {
    pub fn source_wallet(&self) -> WalletKind {
        match self {
            TransferTarget::Wallet { from, .. } => *from,
            TransferTarget::User { .. } => WalletKind::Main,
        }
    }

    /// Recipient and wallet credited on completion
    pub fn destination(&self, sender: &str) -> (UserId, WalletKind) {
        match self {
            TransferTarget::Wallet { to, .. } => (sender.to_string(), *to),
            TransferTarget::User { to_user } => (to_user.clone(), WalletKind::Main),
        }
    }
}

impl std::fmt::Display for TransferTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferTarget::Wallet { from, to } => write!(f, "{} -> {}", from, to),
            TransferTarget::User { to_user } => write!(f, "user {}", to_user),
        }
    }
}

/// Request lifecycle
///
/// Withdrawals: `Pending -> Approved -> Completed | Failed`, `Pending -> Rejected`,
/// `Pending -> Cancelled`. Transfers skip `Approved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    /// Handed to the payout gateway, awaiting settlement
    Approved,
    Completed,
    Rejected,
    Failed,
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed
                | RequestStatus::Rejected
                | RequestStatus::Failed
                | RequestStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::Approved => write!(f, "approved"),
            RequestStatus::Completed => write!(f, "completed"),
            RequestStatus::Rejected => write!(f, "rejected"),
            RequestStatus::Failed => write!(f, "failed"),
            RequestStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: RequestId,
    pub owner: UserId,
    pub kind: WithdrawalKind,
    /// Gross amount debited
    pub amount: u64,
    pub fee: u64,
    pub net_amount: u64,
    pub method: PayoutMethod,
    pub status: RequestStatus,
    /// Settings the request was gated and priced with
    pub settings: SettingsSnapshot,
    pub debit_entry: EntryId,
    pub payout_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub id: RequestId,
    pub owner: UserId,
    pub target: TransferTarget,
    pub amount: u64,
    pub fee: u64,
    pub net_amount: u64,
    pub status: RequestStatus,
    pub settings: SettingsSnapshot,
    pub debit_entry: EntryId,
    pub credit_entry: Option<EntryId>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Withdrawal as submitted by a form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalForm {
    pub kind: String,
    pub amount: String,
    pub method: String,
    #[serde(default)]
    pub investment_id: Option<String>,
}

/// Validated withdrawal order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WithdrawalOrder {
    pub kind: WithdrawalKind,
    pub amount: u64,
    pub method: PayoutMethod,
}

impl TryFrom<WithdrawalForm> for WithdrawalOrder {
    type Error = Error;

    fn try_from(form: WithdrawalForm) -> Result<Self> {
        let investment_id = form
            .investment_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let kind = match (form.kind.trim().to_ascii_lowercase().as_str(), investment_id) {
            ("profit", None) => WithdrawalKind::Profit,
            ("profit", Some(_)) => {
                return Err(Error::Validation(
                    "profit withdrawals do not take an investment".to_string(),
                ))
            }
            ("capital", Some(id)) => WithdrawalKind::Capital {
                investment_id: id
                    .parse()
                    .map_err(|_| Error::Validation(format!("invalid investment id: {}", id)))?,
            },
            ("capital", None) => {
                return Err(Error::Validation(
                    "capital withdrawals require an investment".to_string(),
                ))
            }
            (other, _) => {
                return Err(Error::Validation(format!("unknown withdrawal kind: {}", other)))
            }
        };

        Ok(Self {
            kind,
            amount: parse_amount(&form.amount)?,
            method: form.method.parse()?,
        })
    }
}

/// Transfer as submitted by a form
///
/// Either `to_user` or both wallet kinds are filled in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferForm {
    pub amount: String,
    #[serde(default)]
    pub from_wallet: Option<String>,
    #[serde(default)]
    pub to_wallet: Option<String>,
    #[serde(default)]
    pub to_user: Option<String>,
}

/// Validated transfer order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOrder {
    pub target: TransferTarget,
    pub amount: u64,
}

impl TryFrom<TransferForm> for TransferOrder {
    type Error = Error;

    fn try_from(form: TransferForm) -> Result<Self> {
        let filled = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

        let target = match (filled(form.from_wallet), filled(form.to_wallet), filled(form.to_user)) {
            (None, None, Some(to_user)) => TransferTarget::User { to_user },
            (Some(from), Some(to), None) => TransferTarget::Wallet {
                from: from.parse()?,
                to: to.parse()?,
            },
            _ => {
                return Err(Error::Validation(
                    "transfer needs either a recipient or a wallet pair".to_string(),
                ))
            }
        };

        Ok(Self {
            target,
            amount: parse_amount(&form.amount)?,
        })
    }
}

/// Minor-unit amount from form text
fn parse_amount(raw: &str) -> Result<u64> {
    let amount: u64 = raw
        .trim()
        .replace('_', "")
        .parse()
        .map_err(|_| Error::Validation(format!("invalid amount: {:?}", raw)))?;
    if amount == 0 {
        return Err(Error::Validation("amount must be positive".to_string()));
    }
    Ok(amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_withdrawal_form_variants() {
        let profit = WithdrawalOrder::try_from(WithdrawalForm {
            kind: "Profit".into(),
            amount: "10_000".into(),
            method: "velvpay".into(),
            investment_id: Some("  ".into()),
        })
        .unwrap();
        assert_eq!(profit.kind, WithdrawalKind::Profit);
        assert_eq!(profit.amount, 10_000);

        let id = Uuid::new_v4();
        let capital = WithdrawalOrder::try_from(WithdrawalForm {
            kind: "capital".into(),
            amount: "5000".into(),
            method: "bank".into(),
            investment_id: Some(id.to_string()),
        })
        .unwrap();
        assert_eq!(capital.kind, WithdrawalKind::Capital { investment_id: id });
        assert_eq!(capital.kind.source_wallet(), WalletKind::Investment);
    }

    #[test]
    fn test_withdrawal_form_rejects_mismatch() {
        let missing = WithdrawalForm {
            kind: "capital".into(),
            amount: "5000".into(),
            method: "bank".into(),
            investment_id: None,
        };
        assert!(WithdrawalOrder::try_from(missing).is_err());

        let bad_amount = WithdrawalForm {
            kind: "profit".into(),
            amount: "12.5".into(),
            method: "bank".into(),
            investment_id: None,
        };
        assert!(WithdrawalOrder::try_from(bad_amount).is_err());
    }

    #[test]
    fn test_transfer_form_variants() {
        let user = TransferOrder::try_from(TransferForm {
            amount: "700".into(),
            to_user: Some("bob".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(user.target.destination("alice"), ("bob".to_string(), WalletKind::Main));

        let wallet = TransferOrder::try_from(TransferForm {
            amount: "700".into(),
            from_wallet: Some("profit".into()),
            to_wallet: Some("main".into()),
            to_user: None,
        })
        .unwrap();
        assert_eq!(wallet.target.source_wallet(), WalletKind::Profit);

        let both = TransferForm {
            amount: "700".into(),
            from_wallet: Some("profit".into()),
            to_wallet: Some("main".into()),
            to_user: Some("bob".into()),
        };
        assert!(TransferOrder::try_from(both).is_err());
    }
}
