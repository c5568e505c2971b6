//! Error types for the wallet engine

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the wallet engine
///
/// Every variant maps to a stable code via [`Error::kind`]; the `Display`
/// output is the human-readable detail.
#[derive(Error, Debug)]
pub enum Error {
    // Input errors
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Amount {amount} outside shop range {min}..={max}")]
    OutOfRange { amount: u64, min: u64, max: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    // Balance errors
    #[error("Insufficient funds: {available} available, {required} required")]
    InsufficientFunds { available: u64, required: u64 },

    // Shop errors
    #[error("Shop {shop} capacity exceeded: {filled}/{total} slots filled")]
    CapacityExceeded { shop: String, filled: u32, total: u32 },

    #[error("Shop {shop} is not active (status: {status})")]
    ShopNotActive { shop: String, status: String },

    // Gating errors
    #[error("KYC approval required (current status: {0})")]
    KycRequired(String),

    #[error("Amount {amount} below minimum {min}")]
    BelowMinimum { amount: u64, min: u64 },

    #[error("Amount {amount} above maximum {max}")]
    AboveMaximum { amount: u64, max: u64 },

    #[error("System unavailable: maintenance mode is active")]
    SystemUnavailable,

    #[error("Not eligible: {0}")]
    NotEligible(String),

    // Coordination errors
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("External settlement failed: {0}")]
    ExternalSettlement(String),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    // Infrastructure errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Stable machine-readable error code
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::OutOfRange { .. } => "out_of_range",
            Error::NotFound(_) => "not_found",
            Error::InsufficientFunds { .. } => "insufficient_funds",
            Error::CapacityExceeded { .. } => "capacity_exceeded",
            Error::ShopNotActive { .. } => "shop_not_active",
            Error::KycRequired(_) => "kyc_required",
            Error::BelowMinimum { .. } => "below_minimum",
            Error::AboveMaximum { .. } => "above_maximum",
            Error::SystemUnavailable => "system_unavailable",
            Error::NotEligible(_) => "not_eligible",
            Error::ConcurrencyConflict(_) => "concurrency_conflict",
            Error::ExternalSettlement(_) => "external_settlement_error",
            Error::GatewayUnavailable(_) => "gateway_unavailable",
            Error::Config(_) => "config_error",
            Error::Persistence(_) => "persistence_error",
            Error::Serialization(_) => "serialization_error",
            Error::Io(_) => "io_error",
            Error::Anyhow(_) => "internal_error",
        }
    }

    /// Check if this error is retryable (transient)
    ///
    /// Everything else needs a fresh request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConcurrencyConflict(_) | Error::GatewayUnavailable(_)
        )
    }

    /// Check if this error came from a gating policy rather than bad input
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            Error::SystemUnavailable
                | Error::KycRequired(_)
                | Error::BelowMinimum { .. }
                | Error::AboveMaximum { .. }
                | Error::NotEligible(_)
        )
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(Error::ConcurrencyConflict("wallet u1".into()).is_retryable());
        assert!(!Error::SystemUnavailable.is_retryable());
        assert!(!Error::InsufficientFunds {
            available: 1,
            required: 2
        }
        .is_retryable());
    }

    #[test]
    fn test_kind_codes() {
        assert_eq!(Error::SystemUnavailable.kind(), "system_unavailable");
        assert_eq!(
            Error::CapacityExceeded {
                shop: "s".into(),
                filled: 1,
                total: 1
            }
            .kind(),
            "capacity_exceeded"
        );
        assert!(Error::KycRequired("pending".into()).is_policy_violation());
    }
}
