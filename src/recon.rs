//! Daily reconciliation.
//!
//! For a given day the job sums voucher redemptions, mandate executions, and
//! the credit legs on merchant revenue accounts, and checks the identity
//!
//!   voucher_total + mandate_total == ledger_total
//!
//! with exact decimal equality. A mismatch is report data for operators, not
//! an error: the report carries per-account deltas naming where the books
//! disagree. One report per day; re-running a day overwrites it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::RwLock;
use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::db::Db;
use crate::instruments::InstrumentManager;
use crate::ledger::{Ledger, LedgerLeg};
use crate::models::{is_merchant_revenue_account, merchant_revenue_account};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconStatus {
    Balanced,
    Mismatch,
}

impl ReconStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconStatus::Balanced => "balanced",
            ReconStatus::Mismatch => "mismatch",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "balanced" => Some(ReconStatus::Balanced),
            "mismatch" => Some(ReconStatus::Mismatch),
            _ => None,
        }
    }
}

/// One account where the instrument side and the ledger side disagree.
/// `difference` is instrument minus ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconDelta {
    pub account: String,
    pub instrument_total: Decimal,
    pub ledger_total: Decimal,
    pub difference: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconReport {
    pub day: NaiveDate,
    pub voucher_total: Decimal,
    pub mandate_total: Decimal,
    pub ledger_total: Decimal,
    pub status: ReconStatus,
    pub deltas: Vec<ReconDelta>,
    pub generated_at: DateTime<Utc>,
}

pub struct ReconEngine {
    instruments: Arc<InstrumentManager>,
    ledger: Arc<Ledger>,
    clock: Clock,
    db: Option<Arc<Db>>,
    reports: RwLock<HashMap<NaiveDate, ReconReport>>,
}

impl ReconEngine {
    pub fn new(
        instruments: Arc<InstrumentManager>,
        ledger: Arc<Ledger>,
        clock: Clock,
        db: Option<Arc<Db>>,
    ) -> Self {
        Self {
            instruments,
            ledger,
            clock,
            db,
            reports: RwLock::new(HashMap::new()),
        }
    }

    pub fn hydrate(&self, reports: Vec<ReconReport>) {
        let mut map = self.reports.write();
        for report in reports {
            map.insert(report.day, report);
        }
    }

    /// Reconciles one day from cloned snapshots and stores the report.
    pub fn run(&self, day: NaiveDate) -> ReconReport {
        let redemptions = self.instruments.redemptions_on(day);
        let executions = self.instruments.executions_on(day);
        let entries = self.ledger.day_snapshot(day);

        let voucher_total: Decimal = redemptions.par_iter().map(|r| r.amount).sum();
        let mandate_total: Decimal = executions.par_iter().map(|e| e.amount).sum();
        let ledger_total: Decimal = entries
            .par_iter()
            .filter(|e| e.leg == LedgerLeg::Credit && is_merchant_revenue_account(&e.account))
            .map(|e| e.amount)
            .sum();

        let status = if voucher_total + mandate_total == ledger_total {
            ReconStatus::Balanced
        } else {
            ReconStatus::Mismatch
        };

        let deltas = if status == ReconStatus::Mismatch {
            // Per-merchant-account comparison names where the books differ.
            let mut instrument_side: BTreeMap<String, Decimal> = BTreeMap::new();
            for r in &redemptions {
                *instrument_side
                    .entry(merchant_revenue_account(&r.merchant_id))
                    .or_default() += r.amount;
            }
            for e in &executions {
                *instrument_side
                    .entry(merchant_revenue_account(&e.merchant_id))
                    .or_default() += e.amount;
            }
            let mut ledger_side: BTreeMap<String, Decimal> = BTreeMap::new();
            for entry in &entries {
                if entry.leg == LedgerLeg::Credit && is_merchant_revenue_account(&entry.account) {
                    *ledger_side.entry(entry.account.clone()).or_default() += entry.amount;
                }
            }

            let mut accounts: Vec<String> = instrument_side
                .keys()
                .chain(ledger_side.keys())
                .cloned()
                .collect();
            accounts.sort();
            accounts.dedup();

            accounts
                .into_iter()
                .filter_map(|account| {
                    let instrument_total =
                        instrument_side.get(&account).copied().unwrap_or_default();
                    let ledger_total = ledger_side.get(&account).copied().unwrap_or_default();
                    (instrument_total != ledger_total).then(|| ReconDelta {
                        difference: instrument_total - ledger_total,
                        account,
                        instrument_total,
                        ledger_total,
                    })
                })
                .collect()
        } else {
            Vec::new()
        };

        let report = ReconReport {
            day,
            voucher_total,
            mandate_total,
            ledger_total,
            status,
            deltas,
            generated_at: self.clock.now(),
        };

        match status {
            ReconStatus::Balanced => tracing::info!(
                day = %day,
                voucher_total = %voucher_total,
                mandate_total = %mandate_total,
                ledger_total = %ledger_total,
                "🧾 recon balanced"
            ),
            ReconStatus::Mismatch => tracing::warn!(
                day = %day,
                voucher_total = %voucher_total,
                mandate_total = %mandate_total,
                ledger_total = %ledger_total,
                deltas = report.deltas.len(),
                "⚠️ recon mismatch"
            ),
        }

        self.reports.write().insert(day, report.clone());
        if let Some(db) = &self.db {
            let _ = db.record_recon_report(&report);
        }
        report
    }

    /// Scheduler entry point: reconciles yesterday relative to the clock.
    pub fn run_previous_day(&self) -> ReconReport {
        let day = (self.clock.now() - Duration::days(1)).date_naive();
        self.run(day)
    }

    pub fn report(&self, day: NaiveDate) -> Option<ReconReport> {
        self.reports.read().get(&day).cloned()
    }

    /// All stored reports, newest day first.
    pub fn reports(&self) -> Vec<ReconReport> {
        let mut out: Vec<ReconReport> = self.reports.read().values().cloned().collect();
        out.sort_by(|a, b| b.day.cmp(&a.day));
        out
    }

    pub fn report_count(&self) -> usize {
        self.reports.read().len()
    }
}
