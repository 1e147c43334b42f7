//! Plan lifecycle store.
//!
//! Plans are the budget envelopes everything else hangs off. They are
//! created once, mutated only to change status or whitelist, and never
//! deleted. Status leaves `active` only at or after the window end.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::Db;
use crate::error::{CoreError, CoreResult};
use crate::models::{Plan, PlanStatus};
use crate::money::validate_amount;

/// Inputs for plan creation, already typed by the API layer.
#[derive(Debug, Clone)]
pub struct NewPlan {
    pub name: String,
    pub campus_id: String,
    pub member_ids: Vec<String>,
    pub cap_per_head: Decimal,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub merchant_whitelist: Vec<String>,
    pub created_by: String,
}

pub struct PlanStore {
    plans: RwLock<HashMap<String, Plan>>,
    clock: Clock,
    db: Option<Arc<Db>>,
}

impl PlanStore {
    pub fn new(clock: Clock, db: Option<Arc<Db>>) -> Self {
        PlanStore {
            plans: RwLock::new(HashMap::new()),
            clock,
            db,
        }
    }

    /// Reloads mirrored plans at boot.
    pub fn hydrate(&self, plans: Vec<Plan>) {
        let mut map = self.plans.write();
        for plan in plans {
            map.insert(plan.id.clone(), plan);
        }
    }

    pub fn create_plan(&self, req: NewPlan) -> CoreResult<Plan> {
        if req.name.trim().is_empty() {
            return Err(CoreError::validation("plan name must not be empty"));
        }
        if req.campus_id.trim().is_empty() {
            return Err(CoreError::validation("campus id must not be empty"));
        }
        if req.created_by.trim().is_empty() {
            return Err(CoreError::validation("created_by must not be empty"));
        }
        if req.window_start >= req.window_end {
            return Err(CoreError::validation(format!(
                "window must be ordered: {} >= {}",
                req.window_start, req.window_end
            )));
        }
        let cap_per_head = validate_amount(req.cap_per_head)?;

        // The creator always belongs to the member set.
        let mut member_ids = req.member_ids;
        member_ids.retain(|m| !m.trim().is_empty());
        if !member_ids.iter().any(|m| m == &req.created_by) {
            member_ids.push(req.created_by.clone());
        }
        member_ids.sort();
        member_ids.dedup();
        if member_ids.is_empty() {
            return Err(CoreError::validation("plan needs at least one member"));
        }

        let plan = Plan {
            id: format!("plan_{}", &Uuid::new_v4().simple().to_string()[..12]),
            name: req.name.trim().to_string(),
            campus_id: req.campus_id,
            member_ids,
            cap_per_head,
            window_start: req.window_start,
            window_end: req.window_end,
            merchant_whitelist: req.merchant_whitelist,
            status: PlanStatus::Active,
            created_by: req.created_by,
            created_at: self.clock.now(),
        };

        self.plans.write().insert(plan.id.clone(), plan.clone());
        if let Some(db) = &self.db {
            let _ = db.record_plan(&plan);
        }
        tracing::info!(plan_id = %plan.id, members = plan.member_ids.len(), "📋 plan created");
        Ok(plan)
    }

    pub fn get_plan(&self, plan_id: &str) -> CoreResult<Plan> {
        self.plans
            .read()
            .get(plan_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("plan", plan_id))
    }

    /// Plan that must currently accept instrument activity.
    pub fn active_plan(&self, plan_id: &str) -> CoreResult<Plan> {
        let plan = self.get_plan(plan_id)?;
        if plan.status != PlanStatus::Active {
            return Err(CoreError::InvalidPlanState(format!(
                "plan {} is {}",
                plan.id,
                plan.status.as_str()
            )));
        }
        Ok(plan)
    }

    pub fn plans_for_user(&self, user_id: &str) -> Vec<Plan> {
        let mut out: Vec<Plan> = self
            .plans
            .read()
            .values()
            .filter(|p| p.is_member(user_id) || p.created_by == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    pub fn all_plans(&self) -> Vec<Plan> {
        let mut out: Vec<Plan> = self.plans.read().values().cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// Transitions an active plan to completed or cancelled. Only legal at
    /// or after the window end; plans never re-activate.
    pub fn update_status(&self, plan_id: &str, to: PlanStatus) -> CoreResult<Plan> {
        if to == PlanStatus::Active {
            return Err(CoreError::validation("plans cannot transition back to active"));
        }
        let now = self.clock.now();
        let mut map = self.plans.write();
        let plan = map
            .get_mut(plan_id)
            .ok_or_else(|| CoreError::not_found("plan", plan_id))?;

        if plan.status != PlanStatus::Active {
            return Err(CoreError::InvalidPlanState(format!(
                "plan {} is already {}",
                plan.id,
                plan.status.as_str()
            )));
        }
        if now < plan.window_end {
            return Err(CoreError::InvalidPlanState(format!(
                "plan {} window runs until {}",
                plan.id, plan.window_end
            )));
        }

        plan.status = to;
        let updated = plan.clone();
        drop(map);

        if let Some(db) = &self.db {
            let _ = db.record_plan(&updated);
        }
        tracing::info!(plan_id = %updated.id, status = updated.status.as_str(), "plan status changed");
        Ok(updated)
    }

    pub fn update_whitelist(&self, plan_id: &str, merchants: Vec<String>) -> CoreResult<Plan> {
        let mut map = self.plans.write();
        let plan = map
            .get_mut(plan_id)
            .ok_or_else(|| CoreError::not_found("plan", plan_id))?;
        if plan.status != PlanStatus::Active {
            return Err(CoreError::InvalidPlanState(format!(
                "plan {} is {}",
                plan.id,
                plan.status.as_str()
            )));
        }
        plan.merchant_whitelist = merchants;
        let updated = plan.clone();
        drop(map);

        if let Some(db) = &self.db {
            let _ = db.record_plan(&updated);
        }
        Ok(updated)
    }

    pub fn plan_count(&self) -> usize {
        self.plans.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn store_at(now: &str) -> PlanStore {
        PlanStore::new(Clock::fixed(ts(now)), None)
    }

    fn new_plan() -> NewPlan {
        NewPlan {
            name: "Goa trip".into(),
            campus_id: "campus-1".into(),
            member_ids: vec!["u2".into(), "u3".into()],
            cap_per_head: dec!(300.00),
            window_start: ts("2025-03-10T00:00:00Z"),
            window_end: ts("2025-03-20T00:00:00Z"),
            merchant_whitelist: vec![],
            created_by: "u1".into(),
        }
    }

    #[test]
    fn creator_is_added_to_members() {
        let store = store_at("2025-03-09T00:00:00Z");
        let plan = store.create_plan(new_plan()).unwrap();
        assert!(plan.is_member("u1"));
        assert_eq!(plan.member_ids.len(), 3);
        assert_eq!(plan.status, PlanStatus::Active);
    }

    #[test]
    fn inverted_window_rejected() {
        let store = store_at("2025-03-09T00:00:00Z");
        let mut req = new_plan();
        req.window_start = ts("2025-03-20T00:00:00Z");
        req.window_end = ts("2025-03-10T00:00:00Z");
        assert!(matches!(
            store.create_plan(req),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn status_change_before_window_end_rejected() {
        let store = store_at("2025-03-12T00:00:00Z");
        let plan = store.create_plan(new_plan()).unwrap();
        let err = store
            .update_status(&plan.id, PlanStatus::Completed)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidPlanState(_)));
    }

    #[test]
    fn status_change_after_window_end_applies_once() {
        let clock = Clock::fixed(ts("2025-03-12T00:00:00Z"));
        let store = PlanStore::new(clock.clone(), None);
        let plan = store.create_plan(new_plan()).unwrap();

        clock.advance(Duration::days(10));
        let done = store.update_status(&plan.id, PlanStatus::Completed).unwrap();
        assert_eq!(done.status, PlanStatus::Completed);

        // Terminal states stay terminal.
        assert!(store
            .update_status(&plan.id, PlanStatus::Cancelled)
            .is_err());
    }

    #[test]
    fn plans_for_user_includes_creator_and_sorts_newest_first() {
        let clock = Clock::fixed(ts("2025-03-09T00:00:00Z"));
        let store = PlanStore::new(clock.clone(), None);
        let first = store.create_plan(new_plan()).unwrap();
        clock.advance(Duration::hours(1));
        let mut second_req = new_plan();
        second_req.name = "Fest food".into();
        let second = store.create_plan(second_req).unwrap();

        let listed = store.plans_for_user("u1");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
        assert!(store.plans_for_user("stranger").is_empty());
    }

    #[test]
    fn whitelist_update_applies_to_active_plan() {
        let store = store_at("2025-03-09T00:00:00Z");
        let plan = store.create_plan(new_plan()).unwrap();
        let updated = store
            .update_whitelist(&plan.id, vec!["m-1".into(), "m-2".into()])
            .unwrap();
        assert_eq!(updated.merchant_whitelist.len(), 2);
        assert!(!updated.allows_merchant("m-3"));
    }
}
