//! Domain error taxonomy.
//!
//! Every fallible operation in the payments core returns one of these
//! variants. The API layer maps them onto HTTP statuses; nothing below the
//! API layer knows about transport. Infrastructure faults (mirror writes,
//! boot failures) stay on `anyhow` at the binary boundary and never pass
//! through this enum.

use rust_decimal::Decimal;
use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// Malformed or ill-typed input: bad amounts, inverted windows,
    /// empty member lists.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown entity id (plan, voucher, mandate, merchant).
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The operation does not apply to the entity's current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidPlanState(String),

    /// Voucher remaining value is below the requested amount.
    #[error("insufficient balance: requested {requested}, remaining {remaining}")]
    InsufficientBalance {
        requested: Decimal,
        remaining: Decimal,
    },

    /// Mandate remaining cap is below the requested amount.
    #[error("mandate exhausted: requested {requested}, remaining cap {remaining}")]
    MandateExhausted {
        requested: Decimal,
        remaining: Decimal,
    },

    /// Merchant is outside the instrument or plan whitelist.
    #[error("merchant {merchant_id} not allowed for this instrument")]
    MerchantNotAllowed { merchant_id: String },

    /// Consume attempted past the voucher expiry.
    #[error("voucher {voucher_id} expired at {expired_at}")]
    VoucherExpired {
        voucher_id: String,
        expired_at: String,
    },

    /// Consume attempted outside the mandate validity window.
    #[error("mandate {mandate_id} outside validity window")]
    MandateExpired { mandate_id: String },

    /// Confirm referenced an intent id that was never created.
    #[error("transaction not found: {intent_id}")]
    TransactionNotFound { intent_id: String },

    /// Enforcing-mode guardrail rejected the confirmation.
    #[error("guardrail blocked: {0}")]
    GuardrailBlocked(String),

    /// Append-only store refused a posting (unbalanced legs, non-positive
    /// amounts, double reversal). Indicates a caller bug, not user input.
    #[error("ledger rejected posting: {0}")]
    LedgerRejected(String),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Stable machine-readable kind for API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation_error",
            CoreError::NotFound { .. } => "not_found",
            CoreError::InvalidPlanState(_) => "invalid_plan_state",
            CoreError::InsufficientBalance { .. } => "insufficient_balance",
            CoreError::MandateExhausted { .. } => "mandate_exhausted",
            CoreError::MerchantNotAllowed { .. } => "merchant_not_allowed",
            CoreError::VoucherExpired { .. } => "voucher_expired",
            CoreError::MandateExpired { .. } => "mandate_expired",
            CoreError::TransactionNotFound { .. } => "transaction_not_found",
            CoreError::GuardrailBlocked(_) => "guardrail_blocked",
            CoreError::LedgerRejected(_) => "ledger_rejected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable_strings() {
        let err = CoreError::not_found("plan", "plan-123");
        assert_eq!(err.kind(), "not_found");
        assert_eq!(err.to_string(), "plan not found: plan-123");
    }

    #[test]
    fn balance_error_carries_both_sides() {
        let err = CoreError::InsufficientBalance {
            requested: Decimal::new(20000, 2),
            remaining: Decimal::new(18000, 2),
        };
        assert!(err.to_string().contains("200"));
        assert!(err.to_string().contains("180"));
    }
}
