//! Payment intent/confirm engine.
//!
//! An intent freezes the proposal (plan, member, merchant, amount, mode) as a
//! `pending` transaction and reports the guardrail verdict. Confirm settles
//! it: rail authorization first, then the instrument consume, then the ledger
//! legs, so a decline or instrument refusal leaves no value moved anywhere.
//! Terminal transactions replay as a soft success on repeated confirms.
//!
//! Standalone POS paths (batch voucher redeem, direct mandate execute) run
//! through here too, so every consumption posts its ledger legs in the same
//! flow and the daily reconciliation identity holds.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::clock::{day_bounds, Clock};
use crate::db::Db;
use crate::directory::MerchantDirectory;
use crate::error::{CoreError, CoreResult};
use crate::instruments::{Execution, InstrumentManager, Redemption};
use crate::ledger::{Ledger, LedgerEntry, PostingLeg};
use crate::models::{
    merchant_revenue_account, plan_mandates_account, plan_vouchers_account, GuardrailMode,
    PaymentMode, Plan, Transaction, TxnStatus,
};
use crate::money::validate_amount;
use crate::plans::PlanStore;

// ============================================================================
// GUARDRAIL SEAM
// ============================================================================

/// Everything a guardrail policy gets to look at for one proposed payment.
pub struct GuardrailContext<'a> {
    pub plan: &'a Plan,
    pub member_user_id: &'a str,
    pub amount: Decimal,
    /// Completed spend for this member on this plan since midnight UTC.
    pub day_spend: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct GuardrailVerdict {
    pub triggered: bool,
    pub reasons: Vec<String>,
}

/// Pluggable guardrail predicate. Implementations must be pure over the
/// context; the engine decides what a triggered verdict means.
pub trait GuardrailPolicy: Send + Sync {
    fn evaluate(&self, ctx: &GuardrailContext<'_>) -> GuardrailVerdict;
}

/// Default policy: flags single payments above a flat threshold, and any
/// payment that would push the member's spend for the day past the plan's
/// cap per head.
pub struct ThresholdGuardrail {
    pub threshold: Decimal,
}

impl GuardrailPolicy for ThresholdGuardrail {
    fn evaluate(&self, ctx: &GuardrailContext<'_>) -> GuardrailVerdict {
        let mut reasons = Vec::new();
        if ctx.amount > self.threshold {
            reasons.push(format!(
                "amount {} exceeds guardrail threshold {}",
                ctx.amount, self.threshold
            ));
        }
        if ctx.day_spend + ctx.amount > ctx.plan.cap_per_head {
            reasons.push(format!(
                "day spend {} plus amount {} exceeds cap per head {}",
                ctx.day_spend, ctx.amount, ctx.plan.cap_per_head
            ));
        }
        GuardrailVerdict {
            triggered: !reasons.is_empty(),
            reasons,
        }
    }
}

// ============================================================================
// PAYMENT RAIL SEAM
// ============================================================================

pub struct RailCharge<'a> {
    pub intent_id: &'a str,
    pub merchant_id: &'a str,
    pub amount: Decimal,
    /// Caller-supplied reference; a rail may adopt it as the receipt number.
    pub reference: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct RailReceipt {
    pub rrn: String,
}

#[derive(Debug, Clone)]
pub struct RailDecline {
    pub reason: String,
}

/// External collection rail. The demo deployment runs the stub; a real
/// adapter would wrap an acquirer API behind the same call.
#[async_trait]
pub trait PaymentRail: Send + Sync {
    async fn collect(&self, charge: RailCharge<'_>) -> Result<RailReceipt, RailDecline>;
}

/// Approves everything and hands back a 12-digit retrieval reference.
pub struct StubRail;

#[async_trait]
impl PaymentRail for StubRail {
    async fn collect(&self, charge: RailCharge<'_>) -> Result<RailReceipt, RailDecline> {
        let rrn = match charge.reference {
            Some(reference) => reference.to_string(),
            None => format!("RRN{:012}", rand::thread_rng().gen_range(0..1_000_000_000_000u64)),
        };
        Ok(RailReceipt { rrn })
    }
}

// ============================================================================
// REQUEST / OUTCOME TYPES
// ============================================================================

#[derive(Debug, Clone)]
pub struct NewIntent {
    pub plan_id: String,
    pub member_user_id: String,
    pub merchant_id: String,
    pub amount: Decimal,
    pub mode: PaymentMode,
}

#[derive(Debug, Clone)]
pub struct IntentOutcome {
    pub transaction: Transaction,
    pub guardrail_required: bool,
    pub guardrail_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConfirmOutcome {
    pub transaction: Transaction,
    /// True when the intent was already terminal and this call changed nothing.
    pub replayed: bool,
}

#[derive(Debug, Clone)]
pub struct RedeemItem {
    pub voucher_id: String,
    pub amount: Decimal,
}

/// Per-item result of a batch redeem. Failed items carry the reason and
/// leave the voucher untouched.
#[derive(Debug, Clone, Serialize)]
pub struct RedeemItemOutcome {
    pub voucher_id: String,
    pub status: &'static str,
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redemption_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PaymentStats {
    pub intents_created: u64,
    pub completed: u64,
    pub failed: u64,
    pub replays: u64,
    pub guardrail_flags: u64,
    pub guardrail_blocks: u64,
    pub rail_declines: u64,
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct PaymentEngine {
    plans: Arc<PlanStore>,
    instruments: Arc<InstrumentManager>,
    ledger: Arc<Ledger>,
    directory: Arc<MerchantDirectory>,
    guardrail: Box<dyn GuardrailPolicy>,
    guardrail_mode: GuardrailMode,
    rail: Box<dyn PaymentRail>,
    clock: Clock,
    db: Option<Arc<Db>>,
    transactions: RwLock<HashMap<String, Transaction>>,
    // One lock per pending intent so a double-submitted confirm cannot
    // consume an instrument twice. Removed once the intent is terminal.
    confirm_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    stats: Mutex<PaymentStats>,
}

impl PaymentEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        plans: Arc<PlanStore>,
        instruments: Arc<InstrumentManager>,
        ledger: Arc<Ledger>,
        directory: Arc<MerchantDirectory>,
        guardrail: Box<dyn GuardrailPolicy>,
        guardrail_mode: GuardrailMode,
        rail: Box<dyn PaymentRail>,
        clock: Clock,
        db: Option<Arc<Db>>,
    ) -> Self {
        Self {
            plans,
            instruments,
            ledger,
            directory,
            guardrail,
            guardrail_mode,
            rail,
            clock,
            db,
            transactions: RwLock::new(HashMap::new()),
            confirm_locks: Mutex::new(HashMap::new()),
            stats: Mutex::new(PaymentStats::default()),
        }
    }

    pub fn hydrate(&self, transactions: Vec<Transaction>) {
        let mut map = self.transactions.write();
        let mut stats = self.stats.lock();
        for txn in transactions {
            stats.intents_created += 1;
            match txn.status {
                TxnStatus::Completed => stats.completed += 1,
                TxnStatus::Failed => stats.failed += 1,
                TxnStatus::Pending => {}
            }
            map.insert(txn.intent_id.clone(), txn);
        }
    }

    // ===== INTENT =====

    /// Opens a pending transaction and reports the guardrail verdict.
    /// Advisory mode never blocks here; enforcing mode blocks at confirm.
    pub fn create_intent(&self, req: NewIntent) -> CoreResult<IntentOutcome> {
        let now = self.clock.now();
        let amount = validate_amount(req.amount)?;
        let plan = self.plans.active_plan(&req.plan_id)?;
        if !plan.window_contains(now) {
            return Err(CoreError::InvalidPlanState(format!(
                "plan {} window is not open",
                plan.id
            )));
        }
        if !plan.is_member(&req.member_user_id) {
            return Err(CoreError::validation(format!(
                "{} is not a member of plan {}",
                req.member_user_id, plan.id
            )));
        }
        if !self.directory.is_payable(&req.merchant_id) {
            return Err(CoreError::not_found("merchant", &req.merchant_id));
        }
        if !plan.allows_merchant(&req.merchant_id) {
            return Err(CoreError::MerchantNotAllowed {
                merchant_id: req.merchant_id,
            });
        }

        let day_spend = self.day_spend(&plan.id, &req.member_user_id, now);
        let verdict = self.guardrail.evaluate(&GuardrailContext {
            plan: &plan,
            member_user_id: &req.member_user_id,
            amount,
            day_spend,
        });
        let guardrail_reason = if verdict.reasons.is_empty() {
            None
        } else {
            Some(verdict.reasons.join("; "))
        };

        let intent_id = self.next_intent_id(now);
        let txn = Transaction {
            intent_id: intent_id.clone(),
            plan_id: plan.id.clone(),
            member_user_id: req.member_user_id,
            merchant_id: req.merchant_id,
            amount,
            mode: req.mode,
            status: TxnStatus::Pending,
            guardrail_triggered: verdict.triggered,
            guardrail_reason: guardrail_reason.clone(),
            failure_reason: None,
            rrn: None,
            created_at: now,
            finalized_at: None,
        };
        self.transactions
            .write()
            .insert(intent_id.clone(), txn.clone());
        if let Some(db) = &self.db {
            let _ = db.record_transaction(&txn);
        }

        {
            let mut stats = self.stats.lock();
            stats.intents_created += 1;
            if verdict.triggered {
                stats.guardrail_flags += 1;
            }
        }
        if verdict.triggered {
            tracing::warn!(
                intent_id = %intent_id,
                plan_id = %txn.plan_id,
                amount = %amount,
                reason = guardrail_reason.as_deref().unwrap_or(""),
                "🚧 guardrail flagged intent"
            );
        }
        tracing::info!(
            intent_id = %intent_id,
            plan_id = %txn.plan_id,
            merchant_id = %txn.merchant_id,
            amount = %amount,
            mode = txn.mode.as_str(),
            "💳 payment intent created"
        );

        Ok(IntentOutcome {
            guardrail_required: verdict.triggered,
            guardrail_reason,
            transaction: txn,
        })
    }

    // ===== CONFIRM =====

    /// Settles a pending intent. `approved` carries the caller's disposition;
    /// a false value finalizes the transaction as failed without touching any
    /// instrument. Repeated confirms of a terminal intent replay it.
    pub async fn confirm(
        &self,
        intent_id: &str,
        approved: bool,
        reference: Option<String>,
        failure_reason: Option<String>,
    ) -> CoreResult<ConfirmOutcome> {
        let lock = {
            let mut locks = self.confirm_locks.lock();
            locks.entry(intent_id.to_string()).or_default().clone()
        };
        let _guard = lock.lock().await;

        let txn = self
            .transactions
            .read()
            .get(intent_id)
            .cloned()
            .ok_or_else(|| CoreError::TransactionNotFound {
                intent_id: intent_id.to_string(),
            })?;
        if txn.status.is_terminal() {
            self.stats.lock().replays += 1;
            return Ok(ConfirmOutcome {
                transaction: txn,
                replayed: true,
            });
        }

        let now = self.clock.now();
        if !approved {
            let reason = failure_reason.unwrap_or_else(|| "caller reported failure".to_string());
            let txn = self.finalize(intent_id, TxnStatus::Failed, Some(reason), None, now)?;
            return Ok(ConfirmOutcome {
                transaction: txn,
                replayed: false,
            });
        }

        if txn.guardrail_triggered && self.guardrail_mode == GuardrailMode::Enforcing {
            let reason = txn
                .guardrail_reason
                .clone()
                .unwrap_or_else(|| "guardrail triggered".to_string());
            self.stats.lock().guardrail_blocks += 1;
            self.finalize(intent_id, TxnStatus::Failed, Some(reason.clone()), None, now)?;
            return Err(CoreError::GuardrailBlocked(reason));
        }

        match txn.mode {
            PaymentMode::SplitLater => {
                // Settlement happens outside the core later; record only.
                let txn = self.finalize(intent_id, TxnStatus::Completed, None, reference, now)?;
                tracing::info!(intent_id = %txn.intent_id, "✅ split-later payment recorded");
                Ok(ConfirmOutcome {
                    transaction: txn,
                    replayed: false,
                })
            }
            PaymentMode::Voucher => self.settle_voucher(txn, reference, now).await,
            PaymentMode::Mandate => self.settle_mandate(txn, reference, now).await,
        }
    }

    async fn settle_voucher(
        &self,
        txn: Transaction,
        reference: Option<String>,
        now: DateTime<Utc>,
    ) -> CoreResult<ConfirmOutcome> {
        let Some(voucher_id) = self.instruments.select_voucher(
            &txn.plan_id,
            &txn.member_user_id,
            txn.amount,
            &txn.merchant_id,
            now,
        ) else {
            let reason = format!(
                "no usable voucher covers {} at {}",
                txn.amount, txn.merchant_id
            );
            let txn = self.finalize(&txn.intent_id, TxnStatus::Failed, Some(reason), None, now)?;
            return Ok(ConfirmOutcome {
                transaction: txn,
                replayed: false,
            });
        };

        let receipt = match self.authorize(&txn, reference.as_deref()).await? {
            Ok(receipt) => receipt,
            Err(outcome) => return Ok(outcome),
        };

        match self.instruments.redeem_voucher(
            &voucher_id,
            txn.amount,
            &txn.merchant_id,
            &txn.intent_id,
        ) {
            Ok(_redemption) => {
                self.post_settlement(&txn, plan_vouchers_account(&txn.plan_id), now)?;
                let txn = self.finalize(
                    &txn.intent_id,
                    TxnStatus::Completed,
                    None,
                    Some(receipt.rrn),
                    now,
                )?;
                tracing::info!(
                    intent_id = %txn.intent_id,
                    voucher_id = %voucher_id,
                    amount = %txn.amount,
                    "✅ voucher payment completed"
                );
                Ok(ConfirmOutcome {
                    transaction: txn,
                    replayed: false,
                })
            }
            Err(err) => {
                let txn = self.finalize(
                    &txn.intent_id,
                    TxnStatus::Failed,
                    Some(err.to_string()),
                    None,
                    now,
                )?;
                Ok(ConfirmOutcome {
                    transaction: txn,
                    replayed: false,
                })
            }
        }
    }

    async fn settle_mandate(
        &self,
        txn: Transaction,
        reference: Option<String>,
        now: DateTime<Utc>,
    ) -> CoreResult<ConfirmOutcome> {
        let Some(mandate_id) =
            self.instruments
                .select_mandate(&txn.plan_id, &txn.member_user_id, txn.amount, now)
        else {
            let reason = format!("no usable mandate covers {}", txn.amount);
            let txn = self.finalize(&txn.intent_id, TxnStatus::Failed, Some(reason), None, now)?;
            return Ok(ConfirmOutcome {
                transaction: txn,
                replayed: false,
            });
        };

        let receipt = match self.authorize(&txn, reference.as_deref()).await? {
            Ok(receipt) => receipt,
            Err(outcome) => return Ok(outcome),
        };

        match self.instruments.execute_mandate(
            &mandate_id,
            txn.amount,
            &txn.merchant_id,
            &txn.intent_id,
        ) {
            Ok(_execution) => {
                self.post_settlement(&txn, plan_mandates_account(&txn.plan_id), now)?;
                let txn = self.finalize(
                    &txn.intent_id,
                    TxnStatus::Completed,
                    None,
                    Some(receipt.rrn),
                    now,
                )?;
                tracing::info!(
                    intent_id = %txn.intent_id,
                    mandate_id = %mandate_id,
                    amount = %txn.amount,
                    "✅ mandate payment completed"
                );
                Ok(ConfirmOutcome {
                    transaction: txn,
                    replayed: false,
                })
            }
            Err(err) => {
                let txn = self.finalize(
                    &txn.intent_id,
                    TxnStatus::Failed,
                    Some(err.to_string()),
                    None,
                    now,
                )?;
                Ok(ConfirmOutcome {
                    transaction: txn,
                    replayed: false,
                })
            }
        }
    }

    /// Rail authorization. A decline finalizes the transaction as failed
    /// before any instrument or ledger effect exists, and comes back as
    /// the inner `Err` so callers can short-circuit with the outcome.
    async fn authorize(
        &self,
        txn: &Transaction,
        reference: Option<&str>,
    ) -> CoreResult<Result<RailReceipt, ConfirmOutcome>> {
        match self
            .rail
            .collect(RailCharge {
                intent_id: &txn.intent_id,
                merchant_id: &txn.merchant_id,
                amount: txn.amount,
                reference,
            })
            .await
        {
            Ok(receipt) => Ok(Ok(receipt)),
            Err(decline) => {
                self.stats.lock().rail_declines += 1;
                let now = self.clock.now();
                let reason = format!("rail declined: {}", decline.reason);
                let transaction =
                    self.finalize(&txn.intent_id, TxnStatus::Failed, Some(reason), None, now)?;
                Ok(Err(ConfirmOutcome {
                    transaction,
                    replayed: false,
                }))
            }
        }
    }

    fn post_settlement(
        &self,
        txn: &Transaction,
        source_account: String,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<LedgerEntry>> {
        let entries = self.ledger.post(
            &txn.intent_id,
            vec![
                PostingLeg::debit(source_account, txn.amount),
                PostingLeg::credit(merchant_revenue_account(&txn.merchant_id), txn.amount),
            ],
            now,
        )?;
        if let Some(db) = &self.db {
            let _ = db.record_ledger_entries(&entries);
        }
        Ok(entries)
    }

    fn finalize(
        &self,
        intent_id: &str,
        status: TxnStatus,
        failure_reason: Option<String>,
        rrn: Option<String>,
        now: DateTime<Utc>,
    ) -> CoreResult<Transaction> {
        let snapshot = {
            let mut map = self.transactions.write();
            let txn = map
                .get_mut(intent_id)
                .ok_or_else(|| CoreError::TransactionNotFound {
                    intent_id: intent_id.to_string(),
                })?;
            txn.status = status;
            txn.failure_reason = failure_reason;
            txn.rrn = rrn;
            txn.finalized_at = Some(now);
            txn.clone()
        };

        {
            let mut stats = self.stats.lock();
            match status {
                TxnStatus::Completed => stats.completed += 1,
                TxnStatus::Failed => stats.failed += 1,
                TxnStatus::Pending => {}
            }
        }
        if status == TxnStatus::Failed {
            tracing::warn!(
                intent_id = %snapshot.intent_id,
                reason = snapshot.failure_reason.as_deref().unwrap_or(""),
                "❌ payment failed"
            );
        }

        self.confirm_locks.lock().remove(intent_id);
        if let Some(db) = &self.db {
            let _ = db.record_transaction(&snapshot);
        }
        Ok(snapshot)
    }

    // ===== STANDALONE POS PATHS =====

    /// Redeems a batch of vouchers at one merchant counter. Items succeed or
    /// fail independently; each success posts its own ledger batch.
    pub fn redeem_batch(
        &self,
        merchant_id: &str,
        items: Vec<RedeemItem>,
    ) -> CoreResult<Vec<RedeemItemOutcome>> {
        if !self.directory.is_payable(merchant_id) {
            return Err(CoreError::not_found("merchant", merchant_id));
        }
        if items.is_empty() {
            return Err(CoreError::validation("redeem batch needs at least one item"));
        }

        let now = self.clock.now();
        let mut outcomes = Vec::with_capacity(items.len());
        for item in items {
            let reference = format!("pos_{}", &Uuid::new_v4().simple().to_string()[..12]);
            match self
                .instruments
                .redeem_voucher(&item.voucher_id, item.amount, merchant_id, &reference)
            {
                Ok(redemption) => {
                    self.post_pos_settlement(
                        &reference,
                        plan_vouchers_account(&redemption.plan_id),
                        merchant_id,
                        redemption.amount,
                        now,
                    )?;
                    let remaining = self
                        .instruments
                        .voucher(&item.voucher_id)
                        .map(|v| v.remaining_amount)
                        .ok();
                    outcomes.push(RedeemItemOutcome {
                        voucher_id: item.voucher_id,
                        status: "redeemed",
                        amount: redemption.amount,
                        remaining,
                        redemption_id: Some(redemption.id),
                        error: None,
                    });
                }
                Err(err) => outcomes.push(RedeemItemOutcome {
                    voucher_id: item.voucher_id,
                    status: "failed",
                    amount: item.amount,
                    remaining: None,
                    redemption_id: None,
                    error: Some(err.to_string()),
                }),
            }
        }
        Ok(outcomes)
    }

    /// Directly executes one mandate at a merchant counter. The plan's
    /// whitelist binds mandate spending the same as intent-based payments.
    pub fn execute_mandate_direct(
        &self,
        mandate_id: &str,
        amount: Decimal,
        merchant_id: &str,
    ) -> CoreResult<(Execution, Decimal)> {
        if !self.directory.is_payable(merchant_id) {
            return Err(CoreError::not_found("merchant", merchant_id));
        }
        let mandate = self.instruments.mandate(mandate_id)?;
        let plan = self.plans.get_plan(&mandate.plan_id)?;
        if !plan.allows_merchant(merchant_id) {
            return Err(CoreError::MerchantNotAllowed {
                merchant_id: merchant_id.to_string(),
            });
        }

        let now = self.clock.now();
        let reference = format!("pos_{}", &Uuid::new_v4().simple().to_string()[..12]);
        let execution = self
            .instruments
            .execute_mandate(mandate_id, amount, merchant_id, &reference)?;
        self.post_pos_settlement(
            &reference,
            plan_mandates_account(&execution.plan_id),
            merchant_id,
            execution.amount,
            now,
        )?;
        let remaining = self
            .instruments
            .mandate(mandate_id)
            .map(|m| m.remaining_cap)
            .unwrap_or_default();
        Ok((execution, remaining))
    }

    fn post_pos_settlement(
        &self,
        reference: &str,
        source_account: String,
        merchant_id: &str,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<LedgerEntry>> {
        let entries = self.ledger.post(
            reference,
            vec![
                PostingLeg::debit(source_account, amount),
                PostingLeg::credit(merchant_revenue_account(merchant_id), amount),
            ],
            now,
        )?;
        if let Some(db) = &self.db {
            let _ = db.record_ledger_entries(&entries);
        }
        Ok(entries)
    }

    // ===== QUERIES =====

    pub fn transaction(&self, intent_id: &str) -> CoreResult<Transaction> {
        self.transactions
            .read()
            .get(intent_id)
            .cloned()
            .ok_or_else(|| CoreError::TransactionNotFound {
                intent_id: intent_id.to_string(),
            })
    }

    /// Newest-first transaction listing with optional plan/member filters.
    pub fn transactions(
        &self,
        plan_id: Option<&str>,
        member_user_id: Option<&str>,
        limit: usize,
    ) -> Vec<Transaction> {
        let mut out: Vec<Transaction> = self
            .transactions
            .read()
            .values()
            .filter(|t| plan_id.map_or(true, |p| t.plan_id == p))
            .filter(|t| member_user_id.map_or(true, |u| t.member_user_id == u))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.intent_id.cmp(&a.intent_id))
        });
        out.truncate(limit);
        out
    }

    pub fn stats(&self) -> PaymentStats {
        self.stats.lock().clone()
    }

    fn day_spend(&self, plan_id: &str, member_user_id: &str, now: DateTime<Utc>) -> Decimal {
        let (start, end) = day_bounds(now.date_naive());
        self.transactions
            .read()
            .values()
            .filter(|t| {
                t.plan_id == plan_id
                    && t.member_user_id == member_user_id
                    && t.status == TxnStatus::Completed
            })
            .filter(|t| t.finalized_at.map_or(false, |at| at >= start && at < end))
            .map(|t| t.amount)
            .sum()
    }

    fn next_intent_id(&self, now: DateTime<Utc>) -> String {
        let unix = now.timestamp();
        let mut rng = rand::thread_rng();
        loop {
            let id = format!("intent_{}_{}", unix, rng.gen_range(1000..10000));
            if !self.transactions.read().contains_key(&id) {
                return id;
            }
        }
    }
}
