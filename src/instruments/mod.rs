//! Spending instruments: vouchers and mandates.
//!
//! Both instrument kinds answer the same three questions (can this spend
//! happen, do the spend, what is the current status) behind the
//! `SpendingInstrument` trait. The manager owns the rows, the per-row locks
//! and the consumption logs that reconciliation sums.
//!
//! ```text
//!            ┌──────────────────────────────────────────┐
//!            │             InstrumentManager            │
//!            │                                          │
//!   mint ───►│  vouchers: RwLock<map<id, Mutex<row>>>   │
//!  redeem ──►│  mandates: RwLock<map<id, Mutex<row>>>   │
//! execute ──►│  redemptions / executions (append-only)  │
//!   sweep ──►│  stats                                   │
//!            └───────────────┬──────────────────────────┘
//!                            │ consumption records
//!                            ▼
//!                       recon totals
//! ```
//!
//! Locking order: the map read lock is taken to fetch a row handle and
//! released before the row mutex is locked. Consumption is serialized per
//! instrument, never across instruments.

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::{day_bounds, Clock};
use crate::db::Db;
use crate::error::CoreResult;
use crate::models::{Mandate, Voucher};
use crate::plans::PlanStore;

mod mandates;
mod vouchers;

#[cfg(test)]
mod mandate_tests;
#[cfg(test)]
mod voucher_tests;

// ============================================================================
// SHARED CAPABILITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    Voucher,
    Mandate,
}

/// Result of a successful consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumeOutcome {
    pub remaining: Decimal,
    /// True when this consume drove the remaining value to zero.
    pub depleted: bool,
}

/// Point-in-time instrument snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentStatus {
    pub id: String,
    pub kind: InstrumentKind,
    pub state: &'static str,
    pub remaining: Decimal,
    pub valid_until: DateTime<Utc>,
}

/// The capability both instrument kinds share. `check_available` is pure;
/// `consume` performs the decrement and the terminal-state flip. Callers
/// hold the row lock for the whole check+consume.
pub trait SpendingInstrument {
    fn instrument_id(&self) -> &str;

    fn check_available(
        &self,
        amount: Decimal,
        merchant_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<()>;

    fn consume(
        &mut self,
        amount: Decimal,
        merchant_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<ConsumeOutcome>;

    fn status(&self, now: DateTime<Utc>) -> InstrumentStatus;
}

// ============================================================================
// CONSUMPTION RECORDS
// ============================================================================

/// Appended on every successful voucher redeem. These rows are the
/// voucher-side total reconciliation compares against the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Redemption {
    pub id: String,
    pub voucher_id: String,
    pub plan_id: String,
    pub member_user_id: String,
    pub merchant_id: String,
    pub amount: Decimal,
    pub transaction_ref: String,
    pub redeemed_at: DateTime<Utc>,
}

/// Appended on every successful mandate execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub mandate_id: String,
    pub plan_id: String,
    pub member_user_id: String,
    pub merchant_id: String,
    pub amount: Decimal,
    pub transaction_ref: String,
    pub executed_at: DateTime<Utc>,
}

// ============================================================================
// STATS
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstrumentStats {
    pub vouchers_minted: u64,
    pub vouchers_redeemed: u64,
    pub vouchers_expired: u64,
    pub mandates_created: u64,
    pub mandates_executed: u64,
    pub mandates_cancelled: u64,
    pub mandates_exhausted: u64,
    pub consume_rejections: u64,
}

// ============================================================================
// MANAGER
// ============================================================================

type RowMap<T> = RwLock<HashMap<String, Arc<Mutex<T>>>>;

/// Owns all instrument state. Per-row mutexes serialize concurrent
/// consumption of one instrument while leaving others untouched.
pub struct InstrumentManager {
    pub(crate) vouchers: RowMap<Voucher>,
    pub(crate) mandates: RowMap<Mandate>,
    pub(crate) redemptions: RwLock<Vec<Redemption>>,
    pub(crate) executions: RwLock<Vec<Execution>>,
    pub(crate) plans: Arc<PlanStore>,
    pub(crate) clock: Clock,
    pub(crate) db: Option<Arc<Db>>,
    pub(crate) stats: Mutex<InstrumentStats>,
}

impl InstrumentManager {
    pub fn new(plans: Arc<PlanStore>, clock: Clock, db: Option<Arc<Db>>) -> Self {
        InstrumentManager {
            vouchers: RwLock::new(HashMap::new()),
            mandates: RwLock::new(HashMap::new()),
            redemptions: RwLock::new(Vec::new()),
            executions: RwLock::new(Vec::new()),
            plans,
            clock,
            db,
            stats: Mutex::new(InstrumentStats::default()),
        }
    }

    /// Reloads mirrored state at boot.
    pub fn hydrate(
        &self,
        vouchers: Vec<Voucher>,
        mandates: Vec<Mandate>,
        redemptions: Vec<Redemption>,
        executions: Vec<Execution>,
    ) {
        {
            let mut map = self.vouchers.write();
            for v in vouchers {
                map.insert(v.id.clone(), Arc::new(Mutex::new(v)));
            }
        }
        {
            let mut map = self.mandates.write();
            for m in mandates {
                map.insert(m.id.clone(), Arc::new(Mutex::new(m)));
            }
        }
        let mut stats = self.stats.lock();
        stats.vouchers_minted = self.vouchers.read().len() as u64;
        stats.mandates_created = self.mandates.read().len() as u64;
        stats.vouchers_redeemed = redemptions.len() as u64;
        stats.mandates_executed = executions.len() as u64;
        drop(stats);
        *self.redemptions.write() = redemptions;
        *self.executions.write() = executions;
    }

    /// Redemption records dated inside the given day. Cloned snapshot.
    pub fn redemptions_on(&self, day: NaiveDate) -> Vec<Redemption> {
        let (start, end) = day_bounds(day);
        self.redemptions
            .read()
            .iter()
            .filter(|r| r.redeemed_at >= start && r.redeemed_at < end)
            .cloned()
            .collect()
    }

    /// Execution records dated inside the given day. Cloned snapshot.
    pub fn executions_on(&self, day: NaiveDate) -> Vec<Execution> {
        let (start, end) = day_bounds(day);
        self.executions
            .read()
            .iter()
            .filter(|e| e.executed_at >= start && e.executed_at < end)
            .cloned()
            .collect()
    }

    /// Transitions past-expiry actives to their expired state. Runs from
    /// the background sweep; consume paths also check lazily.
    pub fn sweep_expired(&self) -> (usize, usize) {
        let now = self.clock.now();
        let vouchers_flipped = self.sweep_expired_vouchers(now);
        let mandates_flipped = self.sweep_expired_mandates(now);
        if vouchers_flipped + mandates_flipped > 0 {
            tracing::info!(
                vouchers = vouchers_flipped,
                mandates = mandates_flipped,
                "⏰ expiry sweep flipped instruments"
            );
        }
        (vouchers_flipped, mandates_flipped)
    }

    pub fn stats(&self) -> InstrumentStats {
        self.stats.lock().clone()
    }

    pub(crate) fn row_handle<T>(map: &RowMap<T>, id: &str) -> Option<Arc<Mutex<T>>> {
        map.read().get(id).cloned()
    }
}
