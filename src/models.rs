//! Core domain types for the payments engine.
//!
//! Plans own the budget and the member set; vouchers and mandates are the
//! spending instruments minted against a plan; transactions are the
//! intent/confirm records that tie instrument consumption to ledger
//! postings. Every amount is an exact decimal (see `money`), every
//! timestamp UTC.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Lifecycle enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Active,
    Completed,
    Cancelled,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Active => "active",
            PlanStatus::Completed => "completed",
            PlanStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(PlanStatus::Active),
            "completed" => Some(PlanStatus::Completed),
            "cancelled" => Some(PlanStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoucherState {
    Active,
    Redeemed,
    Expired,
}

impl VoucherState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoucherState::Active => "active",
            VoucherState::Redeemed => "redeemed",
            VoucherState::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(VoucherState::Active),
            "redeemed" => Some(VoucherState::Redeemed),
            "expired" => Some(VoucherState::Expired),
            _ => None,
        }
    }
}

/// Mandates distinguish cap exhaustion from time expiry so consume-time
/// errors can answer "out of money" and "out of window" differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MandateState {
    Active,
    Exhausted,
    Cancelled,
    Expired,
}

impl MandateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MandateState::Active => "active",
            MandateState::Exhausted => "exhausted",
            MandateState::Cancelled => "cancelled",
            MandateState::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(MandateState::Active),
            "exhausted" => Some(MandateState::Exhausted),
            "cancelled" => Some(MandateState::Cancelled),
            "expired" => Some(MandateState::Expired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnStatus {
    Pending,
    Completed,
    Failed,
}

impl TxnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxnStatus::Pending => "pending",
            TxnStatus::Completed => "completed",
            TxnStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TxnStatus::Pending),
            "completed" => Some(TxnStatus::Completed),
            "failed" => Some(TxnStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxnStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    Voucher,
    Mandate,
    SplitLater,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Voucher => "voucher",
            PaymentMode::Mandate => "mandate",
            PaymentMode::SplitLater => "split_later",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "voucher" => Some(PaymentMode::Voucher),
            "mandate" => Some(PaymentMode::Mandate),
            "split_later" => Some(PaymentMode::SplitLater),
            _ => None,
        }
    }
}

/// Guardrail evaluation policy. Advisory flags and proceeds; enforcing
/// fails the confirmation of a flagged intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailMode {
    Advisory,
    Enforcing,
}

impl GuardrailMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "advisory" => Some(GuardrailMode::Advisory),
            "enforcing" => Some(GuardrailMode::Enforcing),
            _ => None,
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A spending plan: the budget envelope a group funds and spends from.
/// Plans are never deleted; after `window_end` they transition to
/// completed or cancelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub campus_id: String,
    pub member_ids: Vec<String>,
    pub cap_per_head: Decimal,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Empty means unrestricted.
    pub merchant_whitelist: Vec<String>,
    pub status: PlanStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn is_member(&self, user_id: &str) -> bool {
        self.member_ids.iter().any(|m| m == user_id)
    }

    pub fn allows_merchant(&self, merchant_id: &str) -> bool {
        self.merchant_whitelist.is_empty()
            || self.merchant_whitelist.iter().any(|m| m == merchant_id)
    }

    pub fn window_contains(&self, now: DateTime<Utc>) -> bool {
        now >= self.window_start && now < self.window_end
    }

    /// Total value the plan's voucher pool may hold.
    pub fn pool_limit(&self) -> Decimal {
        self.cap_per_head * Decimal::from(self.member_ids.len() as u64)
    }
}

/// Pre-funded fixed-value instrument. Remaining value only ever decreases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voucher {
    pub id: String,
    pub plan_id: String,
    pub member_user_id: String,
    pub initial_amount: Decimal,
    pub remaining_amount: Decimal,
    /// Empty means unrestricted.
    pub merchant_list: Vec<String>,
    pub state: VoucherState,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Voucher {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn allows_merchant(&self, merchant_id: &str) -> bool {
        self.merchant_list.is_empty()
            || self.merchant_list.iter().any(|m| m == merchant_id)
    }
}

/// Authorization to spend up to a rolling cap inside a validity window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mandate {
    pub id: String,
    pub plan_id: String,
    pub member_user_id: String,
    pub cap_amount: Decimal,
    pub remaining_cap: Decimal,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub state: MandateState,
    pub created_at: DateTime<Utc>,
}

impl Mandate {
    pub fn in_window(&self, now: DateTime<Utc>) -> bool {
        now >= self.valid_from && now <= self.valid_to
    }
}

/// One intent/confirm record. `intent_id` is the public handle
/// (`intent_{unix}_{rand}`); terminal records are immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub intent_id: String,
    pub plan_id: String,
    pub member_user_id: String,
    pub merchant_id: String,
    pub amount: Decimal,
    pub mode: PaymentMode,
    pub status: TxnStatus,
    pub guardrail_triggered: bool,
    pub guardrail_reason: Option<String>,
    pub failure_reason: Option<String>,
    /// Reference stub from the payment rail, set on completion.
    pub rrn: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// ============================================================================
// Account naming
// ============================================================================

// Structured ledger account names. One scheme used everywhere so recon can
// select merchant revenue accounts by shape.

pub fn plan_vouchers_account(plan_id: &str) -> String {
    format!("plan:{plan_id}:vouchers")
}

pub fn plan_mandates_account(plan_id: &str) -> String {
    format!("plan:{plan_id}:mandates")
}

pub fn merchant_revenue_account(merchant_id: &str) -> String {
    format!("merchant:{merchant_id}:revenue")
}

pub fn is_merchant_revenue_account(account: &str) -> bool {
    account.starts_with("merchant:") && account.ends_with(":revenue")
}

// ============================================================================
// Configuration
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    pub guardrail_threshold: Decimal,
    pub guardrail_mode: GuardrailMode,
    pub recon_interval_secs: u64,
    pub recon_schedule_enabled: bool,
    pub idempotency_retention_hours: i64,
    pub idempotency_sweep_secs: u64,
    pub expiry_sweep_secs: u64,
    pub seed_demo_data: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path = std::env::var("AEONPAY_DB_PATH")
            .unwrap_or_else(|_| "./aeonpay.db".to_string());

        let port = std::env::var("AEONPAY_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let guardrail_threshold = std::env::var("AEONPAY_GUARDRAIL_THRESHOLD")
            .ok()
            .and_then(|s| Decimal::from_str(&s).ok())
            .unwrap_or_else(|| Decimal::new(25000, 2));

        let guardrail_mode = std::env::var("AEONPAY_GUARDRAIL_MODE")
            .ok()
            .and_then(|s| GuardrailMode::parse(&s))
            .unwrap_or(GuardrailMode::Advisory);

        let recon_interval_secs = std::env::var("AEONPAY_RECON_INTERVAL_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .unwrap_or(3600);

        let recon_schedule_enabled = std::env::var("AEONPAY_RECON_SCHEDULE")
            .map(|s| s != "0" && s.to_lowercase() != "false")
            .unwrap_or(true);

        let idempotency_retention_hours =
            std::env::var("AEONPAY_IDEMPOTENCY_RETENTION_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .unwrap_or(24);

        let idempotency_sweep_secs = std::env::var("AEONPAY_IDEMPOTENCY_SWEEP_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .unwrap_or(3600);

        let expiry_sweep_secs = std::env::var("AEONPAY_EXPIRY_SWEEP_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .unwrap_or(300);

        let seed_demo_data = std::env::var("AEONPAY_SEED_DEMO")
            .map(|s| s != "0" && s.to_lowercase() != "false")
            .unwrap_or(true);

        Ok(Self {
            database_path,
            port,
            guardrail_threshold,
            guardrail_mode,
            recon_interval_secs,
            recon_schedule_enabled,
            idempotency_retention_hours,
            idempotency_sweep_secs,
            expiry_sweep_secs,
            seed_demo_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn sample_plan() -> Plan {
        Plan {
            id: "plan-1".into(),
            name: "Goa trip".into(),
            campus_id: "campus-1".into(),
            member_ids: vec!["u1".into(), "u2".into(), "u3".into()],
            cap_per_head: dec!(300.00),
            window_start: ts("2025-03-10T00:00:00Z"),
            window_end: ts("2025-03-20T00:00:00Z"),
            merchant_whitelist: vec![],
            status: PlanStatus::Active,
            created_by: "u1".into(),
            created_at: ts("2025-03-09T12:00:00Z"),
        }
    }

    #[test]
    fn empty_whitelist_is_unrestricted() {
        let plan = sample_plan();
        assert!(plan.allows_merchant("m-anything"));

        let mut restricted = sample_plan();
        restricted.merchant_whitelist = vec!["m-1".into()];
        assert!(restricted.allows_merchant("m-1"));
        assert!(!restricted.allows_merchant("m-2"));
    }

    #[test]
    fn pool_limit_scales_with_members() {
        assert_eq!(sample_plan().pool_limit(), dec!(900.00));
    }

    #[test]
    fn plan_window_is_half_open() {
        let plan = sample_plan();
        assert!(plan.window_contains(ts("2025-03-10T00:00:00Z")));
        assert!(!plan.window_contains(ts("2025-03-20T00:00:00Z")));
    }

    #[test]
    fn account_shapes() {
        assert_eq!(plan_vouchers_account("p1"), "plan:p1:vouchers");
        assert_eq!(merchant_revenue_account("m9"), "merchant:m9:revenue");
        assert!(is_merchant_revenue_account("merchant:m9:revenue"));
        assert!(!is_merchant_revenue_account("plan:p1:vouchers"));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [TxnStatus::Pending, TxnStatus::Completed, TxnStatus::Failed] {
            assert_eq!(TxnStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(MandateState::parse("exhausted"), Some(MandateState::Exhausted));
        assert!(PaymentMode::parse("upi").is_none());
    }

    #[test]
    fn mandate_window_includes_both_ends() {
        let mandate = Mandate {
            id: "mdt-1".into(),
            plan_id: "plan-1".into(),
            member_user_id: "u1".into(),
            cap_amount: dec!(200.00),
            remaining_cap: dec!(200.00),
            valid_from: ts("2025-03-10T00:00:00Z"),
            valid_to: ts("2025-03-12T00:00:00Z"),
            state: MandateState::Active,
            created_at: ts("2025-03-09T12:00:00Z"),
        };
        assert!(mandate.in_window(ts("2025-03-10T00:00:00Z")));
        assert!(mandate.in_window(ts("2025-03-12T00:00:00Z")));
        assert!(!mandate.in_window(ts("2025-03-12T00:00:01Z")));
    }
}
