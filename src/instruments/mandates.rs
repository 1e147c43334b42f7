//! Mandate lifecycle: create, execute, cancel, expire.
//!
//! A mandate authorizes spend up to a rolling cap inside a validity
//! window. Cap exhaustion (`exhausted`) and time expiry (`expired`) are
//! separate terminal states so consume-time errors name the right cause.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::models::{Mandate, MandateState};
use crate::money::validate_amount;

use super::{
    ConsumeOutcome, Execution, InstrumentKind, InstrumentManager, InstrumentStatus,
    SpendingInstrument,
};

impl SpendingInstrument for Mandate {
    fn instrument_id(&self) -> &str {
        &self.id
    }

    fn check_available(
        &self,
        amount: Decimal,
        _merchant_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        match self.state {
            MandateState::Cancelled => {
                return Err(CoreError::InvalidPlanState(format!(
                    "mandate {} is cancelled",
                    self.id
                )))
            }
            MandateState::Exhausted => {
                return Err(CoreError::MandateExhausted {
                    requested: amount,
                    remaining: Decimal::ZERO,
                })
            }
            MandateState::Expired => {
                return Err(CoreError::MandateExpired {
                    mandate_id: self.id.clone(),
                })
            }
            MandateState::Active => {}
        }
        if !self.in_window(now) {
            return Err(CoreError::MandateExpired {
                mandate_id: self.id.clone(),
            });
        }
        if amount > self.remaining_cap {
            return Err(CoreError::MandateExhausted {
                requested: amount,
                remaining: self.remaining_cap,
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
        self.remaining_cap -= amount;
        let depleted = self.remaining_cap == Decimal::ZERO;
        if depleted {
            self.state = MandateState::Exhausted;
        }
        Ok(ConsumeOutcome {
            remaining: self.remaining_cap,
            depleted,
        })
    }

    fn status(&self, now: DateTime<Utc>) -> InstrumentStatus {
        let state = if self.state == MandateState::Active && now > self.valid_to {
            MandateState::Expired.as_str()
        } else {
            self.state.as_str()
        };
        InstrumentStatus {
            id: self.id.clone(),
            kind: InstrumentKind::Mandate,
            state,
            remaining: self.remaining_cap,
            valid_until: self.valid_to,
        }
    }
}

impl InstrumentManager {
    /// Creates one mandate per member. Caps are bounded by the plan's
    /// cap-per-head and validity must sit inside the plan window.
    pub fn create_mandates(
        &self,
        plan_id: &str,
        member_ids: &[String],
        cap_amount: Decimal,
        valid_from: DateTime<Utc>,
        valid_to: DateTime<Utc>,
    ) -> CoreResult<Vec<Mandate>> {
        let now = self.clock.now();
        let plan = self.plans.active_plan(plan_id)?;
        let cap_amount = validate_amount(cap_amount)?;

        let mut members: Vec<String> = member_ids.to_vec();
        members.sort();
        members.dedup();
        if members.is_empty() {
            return Err(CoreError::validation("mandate creation needs at least one member"));
        }
        for member in &members {
            if !plan.is_member(member) {
                return Err(CoreError::validation(format!(
                    "{member} is not a member of plan {plan_id}"
                )));
            }
        }
        if cap_amount > plan.cap_per_head {
            return Err(CoreError::validation(format!(
                "cap {cap_amount} exceeds plan cap-per-head {}",
                plan.cap_per_head
            )));
        }
        if valid_from >= valid_to {
            return Err(CoreError::validation(format!(
                "validity must be ordered: {valid_from} >= {valid_to}"
            )));
        }
        if valid_from < plan.window_start || valid_to > plan.window_end {
            return Err(CoreError::validation(
                "mandate validity must sit inside the plan window",
            ));
        }

        let created: Vec<Mandate> = members
            .iter()
            .map(|member| Mandate {
                id: format!("mdt_{}", &Uuid::new_v4().simple().to_string()[..12]),
                plan_id: plan.id.clone(),
                member_user_id: member.clone(),
                cap_amount,
                remaining_cap: cap_amount,
                valid_from,
                valid_to,
                state: MandateState::Active,
                created_at: now,
            })
            .collect();

        {
            let mut map = self.mandates.write();
            for m in &created {
                map.insert(m.id.clone(), std::sync::Arc::new(parking_lot::Mutex::new(m.clone())));
            }
        }
        if let Some(db) = &self.db {
            for m in &created {
                let _ = db.record_mandate(m);
            }
        }
        self.stats.lock().mandates_created += created.len() as u64;
        tracing::info!(
            plan_id = %plan.id,
            count = created.len(),
            cap = %cap_amount,
            "📜 mandates created"
        );
        Ok(created)
    }

    /// Spends against one mandate and appends the execution record. The
    /// row mutex serializes concurrent executions of one mandate.
    pub fn execute_mandate(
        &self,
        mandate_id: &str,
        amount: Decimal,
        merchant_id: &str,
        transaction_ref: &str,
    ) -> CoreResult<Execution> {
        let now = self.clock.now();
        let amount = validate_amount(amount)?;
        let handle = Self::row_handle(&self.mandates, mandate_id)
            .ok_or_else(|| CoreError::not_found("mandate", mandate_id))?;

        let (snapshot, outcome) = {
            let mut row = handle.lock();
            // Past the window end the state flips for good; before the
            // window start it stays active and just refuses.
            if row.state == MandateState::Active && now > row.valid_to {
                row.state = MandateState::Expired;
                let expired = row.clone();
                drop(row);
                if let Some(db) = &self.db {
                    let _ = db.record_mandate(&expired);
                }
                let mut stats = self.stats.lock();
                stats.consume_rejections += 1;
                return Err(CoreError::MandateExpired {
                    mandate_id: expired.id,
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

        let execution = Execution {
            id: format!("exe_{}", &Uuid::new_v4().simple().to_string()[..12]),
            mandate_id: snapshot.id.clone(),
            plan_id: snapshot.plan_id.clone(),
            member_user_id: snapshot.member_user_id.clone(),
            merchant_id: merchant_id.to_string(),
            amount,
            transaction_ref: transaction_ref.to_string(),
            executed_at: now,
        };
        self.executions.write().push(execution.clone());

        if let Some(db) = &self.db {
            let _ = db.record_mandate(&snapshot);
            let _ = db.record_execution(&execution);
        }
        {
            let mut stats = self.stats.lock();
            stats.mandates_executed += 1;
            if outcome.depleted {
                stats.mandates_exhausted += 1;
            }
        }
        tracing::info!(
            mandate_id = %snapshot.id,
            amount = %amount,
            remaining_cap = %outcome.remaining,
            "mandate executed"
        );
        Ok(execution)
    }

    /// Cancels an active mandate. Cancelling twice is a no-op; terminal
    /// states other than cancelled refuse.
    pub fn cancel_mandate(&self, mandate_id: &str) -> CoreResult<Mandate> {
        let handle = Self::row_handle(&self.mandates, mandate_id)
            .ok_or_else(|| CoreError::not_found("mandate", mandate_id))?;

        let snapshot = {
            let mut row = handle.lock();
            match row.state {
                MandateState::Cancelled => return Ok(row.clone()),
                MandateState::Exhausted | MandateState::Expired => {
                    return Err(CoreError::InvalidPlanState(format!(
                        "mandate {} is {}",
                        row.id,
                        row.state.as_str()
                    )))
                }
                MandateState::Active => {
                    row.state = MandateState::Cancelled;
                    row.clone()
                }
            }
        };

        if let Some(db) = &self.db {
            let _ = db.record_mandate(&snapshot);
        }
        self.stats.lock().mandates_cancelled += 1;
        tracing::info!(mandate_id = %snapshot.id, "mandate cancelled");
        Ok(snapshot)
    }

    pub fn mandate(&self, mandate_id: &str) -> CoreResult<Mandate> {
        Self::row_handle(&self.mandates, mandate_id)
            .map(|h| h.lock().clone())
            .ok_or_else(|| CoreError::not_found("mandate", mandate_id))
    }

    pub fn mandates_for_plan(&self, plan_id: &str) -> Vec<Mandate> {
        let handles: Vec<_> = self.mandates.read().values().cloned().collect();
        let mut out: Vec<Mandate> = handles
            .iter()
            .map(|h| h.lock().clone())
            .filter(|m| m.plan_id == plan_id)
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        out
    }

    /// Picks the member's usable mandate for a spend. Earliest window end
    /// wins when several qualify.
    pub fn select_mandate(
        &self,
        plan_id: &str,
        member_user_id: &str,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let handles: Vec<_> = self.mandates.read().values().cloned().collect();
        let mut candidates: Vec<(DateTime<Utc>, String)> = Vec::new();
        for handle in handles {
            let row = handle.lock();
            if row.plan_id == plan_id
                && row.member_user_id == member_user_id
                && row.state == MandateState::Active
                && row.in_window(now)
                && row.remaining_cap >= amount
            {
                candidates.push((row.valid_to, row.id.clone()));
            }
        }
        candidates.sort();
        candidates.into_iter().next().map(|(_, id)| id)
    }

    pub(crate) fn sweep_expired_mandates(&self, now: DateTime<Utc>) -> usize {
        let handles: Vec<_> = self.mandates.read().values().cloned().collect();
        let mut flipped = Vec::new();
        for handle in handles {
            let mut row = handle.lock();
            if row.state == MandateState::Active && now > row.valid_to {
                row.state = MandateState::Expired;
                flipped.push(row.clone());
            }
        }
        if let Some(db) = &self.db {
            for m in &flipped {
                let _ = db.record_mandate(m);
            }
        }
        flipped.len()
    }
}
