//! Voucher lifecycle: mint, redeem, expire.
//!
//! Vouchers are pre-funded and fixed: the per-plan pool never exceeds
//! cap_per_head x member_count, remaining value only decreases, and a
//! voucher that hits zero is `redeemed` for good. Expiry is checked lazily
//! at consume time and flipped by the background sweep.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::models::{Voucher, VoucherState};
use crate::money::validate_amount;

use super::{
    ConsumeOutcome, InstrumentKind, InstrumentManager, InstrumentStatus, Redemption,
    SpendingInstrument,
};

impl SpendingInstrument for Voucher {
    fn instrument_id(&self) -> &str {
        &self.id
    }

    fn check_available(
        &self,
        amount: Decimal,
        merchant_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        match self.state {
            VoucherState::Expired => {
                return Err(CoreError::VoucherExpired {
                    voucher_id: self.id.clone(),
                    expired_at: self.expires_at.to_rfc3339(),
                })
            }
            VoucherState::Redeemed => {
                return Err(CoreError::InvalidPlanState(format!(
                    "voucher {} is already fully redeemed",
                    self.id
                )))
            }
            VoucherState::Active => {}
        }
        if self.is_expired(now) {
            return Err(CoreError::VoucherExpired {
                voucher_id: self.id.clone(),
                expired_at: self.expires_at.to_rfc3339(),
            });
        }
        if !self.allows_merchant(merchant_id) {
            return Err(CoreError::MerchantNotAllowed {
                merchant_id: merchant_id.to_string(),
            });
        }
        if amount > self.remaining_amount {
            return Err(CoreError::InsufficientBalance {
                requested: amount,
                remaining: self.remaining_amount,
            });
        }
        Ok(())
    }

    fn consume(
        &mut self,
        amount: Decimal,
        merchant_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<ConsumeOutcome> {
        self.check_available(amount, merchant_id, now)?;
        self.remaining_amount -= amount;
        let depleted = self.remaining_amount == Decimal::ZERO;
        if depleted {
            self.state = VoucherState::Redeemed;
        }
        Ok(ConsumeOutcome {
            remaining: self.remaining_amount,
            depleted,
        })
    }

    fn status(&self, now: DateTime<Utc>) -> InstrumentStatus {
        let state = if self.state == VoucherState::Active && self.is_expired(now) {
            VoucherState::Expired.as_str()
        } else {
            self.state.as_str()
        };
        InstrumentStatus {
            id: self.id.clone(),
            kind: InstrumentKind::Voucher,
            state,
            remaining: self.remaining_amount,
            valid_until: self.expires_at,
        }
    }
}

impl InstrumentManager {
    /// Mints one voucher per member against an active plan. The minted
    /// total is capped by the plan's fixed pool.
    pub fn mint_vouchers(
        &self,
        plan_id: &str,
        member_ids: &[String],
        amount: Decimal,
        expires_at: DateTime<Utc>,
        merchant_list: Vec<String>,
    ) -> CoreResult<Vec<Voucher>> {
        let now = self.clock.now();
        let plan = self.plans.active_plan(plan_id)?;
        let amount = validate_amount(amount)?;

        let mut members: Vec<String> = member_ids.to_vec();
        members.sort();
        members.dedup();
        if members.is_empty() {
            return Err(CoreError::validation("mint needs at least one member"));
        }
        for member in &members {
            if !plan.is_member(member) {
                return Err(CoreError::validation(format!(
                    "{member} is not a member of plan {plan_id}"
                )));
            }
        }
        if expires_at <= now {
            return Err(CoreError::validation(format!(
                "expiry {expires_at} is not in the future"
            )));
        }
        if expires_at > plan.window_end {
            return Err(CoreError::validation(format!(
                "expiry {expires_at} is past the plan window end {}",
                plan.window_end
            )));
        }

        let batch_total = amount * Decimal::from(members.len() as u64);
        let minted_so_far = self.minted_total(plan_id);
        let pool_remaining = plan.pool_limit() - minted_so_far;
        if batch_total > pool_remaining {
            return Err(CoreError::InsufficientBalance {
                requested: batch_total,
                remaining: pool_remaining,
            });
        }

        // Empty list inherits the plan whitelist, so a restricted plan
        // cannot mint unrestricted vouchers by omission.
        let merchant_list = if merchant_list.is_empty() {
            plan.merchant_whitelist.clone()
        } else {
            merchant_list
        };

        let minted: Vec<Voucher> = members
            .iter()
            .map(|member| Voucher {
                id: format!("vch_{}", &Uuid::new_v4().simple().to_string()[..12]),
                plan_id: plan.id.clone(),
                member_user_id: member.clone(),
                initial_amount: amount,
                remaining_amount: amount,
                merchant_list: merchant_list.clone(),
                state: VoucherState::Active,
                expires_at,
                created_at: now,
            })
            .collect();

        {
            let mut map = self.vouchers.write();
            for v in &minted {
                map.insert(v.id.clone(), std::sync::Arc::new(parking_lot::Mutex::new(v.clone())));
            }
        }
        if let Some(db) = &self.db {
            for v in &minted {
                let _ = db.record_voucher(v);
            }
        }
        self.stats.lock().vouchers_minted += minted.len() as u64;
        tracing::info!(
            plan_id = %plan.id,
            count = minted.len(),
            amount = %amount,
            "🎫 vouchers minted"
        );
        Ok(minted)
    }

    /// Redeems value from one voucher and appends the redemption record.
    /// The row mutex is held for the whole check+decrement, so concurrent
    /// redeems of one voucher serialize.
    pub fn redeem_voucher(
        &self,
        voucher_id: &str,
        amount: Decimal,
        merchant_id: &str,
        transaction_ref: &str,
    ) -> CoreResult<Redemption> {
        let now = self.clock.now();
        let amount = validate_amount(amount)?;
        let handle = Self::row_handle(&self.vouchers, voucher_id)
            .ok_or_else(|| CoreError::not_found("voucher", voucher_id))?;

        let (snapshot, outcome) = {
            let mut row = handle.lock();
            if row.state == VoucherState::Active && row.is_expired(now) {
                row.state = VoucherState::Expired;
                let expired = row.clone();
                drop(row);
                if let Some(db) = &self.db {
                    let _ = db.record_voucher(&expired);
                }
                let mut stats = self.stats.lock();
                stats.vouchers_expired += 1;
                stats.consume_rejections += 1;
                return Err(CoreError::VoucherExpired {
                    voucher_id: expired.id,
                    expired_at: expired.expires_at.to_rfc3339(),
                });
            }
            match row.consume(amount, merchant_id, now) {
                Ok(outcome) => (row.clone(), outcome),
                Err(e) => {
                    self.stats.lock().consume_rejections += 1;
                    return Err(e);
                }
            }
        };

        let redemption = Redemption {
            id: format!("rdm_{}", &Uuid::new_v4().simple().to_string()[..12]),
            voucher_id: snapshot.id.clone(),
            plan_id: snapshot.plan_id.clone(),
            member_user_id: snapshot.member_user_id.clone(),
            merchant_id: merchant_id.to_string(),
            amount,
            transaction_ref: transaction_ref.to_string(),
            redeemed_at: now,
        };
        self.redemptions.write().push(redemption.clone());

        if let Some(db) = &self.db {
            let _ = db.record_voucher(&snapshot);
            let _ = db.record_redemption(&redemption);
        }
        self.stats.lock().vouchers_redeemed += 1;
        tracing::info!(
            voucher_id = %snapshot.id,
            amount = %amount,
            remaining = %outcome.remaining,
            depleted = outcome.depleted,
            "voucher redeemed"
        );
        Ok(redemption)
    }

    pub fn voucher(&self, voucher_id: &str) -> CoreResult<Voucher> {
        Self::row_handle(&self.vouchers, voucher_id)
            .map(|h| h.lock().clone())
            .ok_or_else(|| CoreError::not_found("voucher", voucher_id))
    }

    pub fn vouchers_for_plan(&self, plan_id: &str) -> Vec<Voucher> {
        let handles: Vec<_> = self.vouchers.read().values().cloned().collect();
        let mut out: Vec<Voucher> = handles
            .iter()
            .map(|h| h.lock().clone())
            .filter(|v| v.plan_id == plan_id)
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        out
    }

    /// Picks the member's usable voucher for a spend: active, unexpired,
    /// merchant allowed, enough remaining. Earliest expiry wins so value
    /// at risk of expiring is spent first.
    pub fn select_voucher(
        &self,
        plan_id: &str,
        member_user_id: &str,
        amount: Decimal,
        merchant_id: &str,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let handles: Vec<_> = self.vouchers.read().values().cloned().collect();
        let mut candidates: Vec<(DateTime<Utc>, String)> = Vec::new();
        for handle in handles {
            let row = handle.lock();
            if row.plan_id == plan_id
                && row.member_user_id == member_user_id
                && row.state == VoucherState::Active
                && !row.is_expired(now)
                && row.allows_merchant(merchant_id)
                && row.remaining_amount >= amount
            {
                candidates.push((row.expires_at, row.id.clone()));
            }
        }
        candidates.sort();
        candidates.into_iter().next().map(|(_, id)| id)
    }

    /// Sum of initial amounts minted against a plan, any state. The pool
    /// check compares this against the plan's fixed limit.
    pub fn minted_total(&self, plan_id: &str) -> Decimal {
        let handles: Vec<_> = self.vouchers.read().values().cloned().collect();
        handles
            .iter()
            .map(|h| h.lock().clone())
            .filter(|v| v.plan_id == plan_id)
            .map(|v| v.initial_amount)
            .sum()
    }

    pub(crate) fn sweep_expired_vouchers(&self, now: DateTime<Utc>) -> usize {
        let handles: Vec<_> = self.vouchers.read().values().cloned().collect();
        let mut flipped = Vec::new();
        for handle in handles {
            let mut row = handle.lock();
            if row.state == VoucherState::Active && row.is_expired(now) {
                row.state = VoucherState::Expired;
                flipped.push(row.clone());
            }
        }
        if let Some(db) = &self.db {
            for v in &flipped {
                let _ = db.record_voucher(v);
            }
        }
        self.stats.lock().vouchers_expired += flipped.len() as u64;
        flipped.len()
    }
}
