//! Adversarial mandate lifecycle tests.
//!
//! These verify cap bounding, validity-window handling, cancellation rules
//! and the per-mandate lock under concurrent execution.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::CoreError;
use crate::instruments::InstrumentManager;
use crate::models::{MandateState, Plan};
use crate::plans::{NewPlan, PlanStore};

// =============================================================================
// HELPERS
// =============================================================================

fn ts(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

fn setup() -> (Clock, Arc<InstrumentManager>, Plan) {
    let clock = Clock::fixed(ts("2025-03-12T09:00:00Z"));
    let plans = Arc::new(PlanStore::new(clock.clone(), None));
    let plan = plans
        .create_plan(NewPlan {
            name: "Fest week".into(),
            campus_id: "campus-1".into(),
            member_ids: vec!["u1".into(), "u2".into(), "u3".into()],
            cap_per_head: dec!(300.00),
            window_start: ts("2025-03-10T00:00:00Z"),
            window_end: ts("2025-03-20T00:00:00Z"),
            merchant_whitelist: vec![],
            created_by: "u1".into(),
        })
        .expect("plan should create");
    let manager = Arc::new(InstrumentManager::new(plans, clock.clone(), None));
    (clock, manager, plan)
}

fn create_one(manager: &InstrumentManager, plan: &Plan, cap: rust_decimal::Decimal) -> String {
    manager
        .create_mandates(
            &plan.id,
            &["u1".to_string()],
            cap,
            ts("2025-03-11T00:00:00Z"),
            ts("2025-03-15T00:00:00Z"),
        )
        .expect("create should succeed")[0]
        .id
        .clone()
}

// =============================================================================
// CREATION
// =============================================================================

#[test]
fn create_issues_one_mandate_per_member() {
    let (_, manager, plan) = setup();
    let created = manager
        .create_mandates(
            &plan.id,
            &plan.member_ids,
            dec!(200.00),
            ts("2025-03-11T00:00:00Z"),
            ts("2025-03-15T00:00:00Z"),
        )
        .unwrap();
    assert_eq!(created.len(), 3);
    for m in &created {
        assert_eq!(m.state, MandateState::Active);
        assert_eq!(m.remaining_cap, dec!(200.00));
    }
}

#[test]
fn cap_above_plan_cap_per_head_rejected() {
    let (_, manager, plan) = setup();
    let err = manager
        .create_mandates(
            &plan.id,
            &["u1".to_string()],
            dec!(301.00),
            ts("2025-03-11T00:00:00Z"),
            ts("2025-03-15T00:00:00Z"),
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}

#[test]
fn validity_outside_plan_window_rejected() {
    let (_, manager, plan) = setup();
    let err = manager
        .create_mandates(
            &plan.id,
            &["u1".to_string()],
            dec!(100.00),
            ts("2025-03-09T00:00:00Z"),
            ts("2025-03-15T00:00:00Z"),
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}

// =============================================================================
// EXECUTION
// =============================================================================

#[test]
fn execute_decrements_until_exhausted() {
    let (_, manager, plan) = setup();
    let mid = create_one(&manager, &plan, dec!(300.00));

    manager.execute_mandate(&mid, dec!(100.00), "m-1", "txn-1").unwrap();
    manager.execute_mandate(&mid, dec!(200.00), "m-1", "txn-2").unwrap();

    let m = manager.mandate(&mid).unwrap();
    assert_eq!(m.remaining_cap, dec!(0.00));
    assert_eq!(m.state, MandateState::Exhausted);

    let err = manager
        .execute_mandate(&mid, dec!(1.00), "m-1", "txn-3")
        .unwrap_err();
    assert_eq!(
        err,
        CoreError::MandateExhausted {
            requested: dec!(1.00),
            remaining: dec!(0.00),
        }
    );
}

#[test]
fn exceeding_cap_leaves_mandate_untouched() {
    let (_, manager, plan) = setup();
    let mid = create_one(&manager, &plan, dec!(150.00));

    let err = manager
        .execute_mandate(&mid, dec!(150.01), "m-1", "txn-1")
        .unwrap_err();
    assert!(matches!(err, CoreError::MandateExhausted { .. }));

    let m = manager.mandate(&mid).unwrap();
    assert_eq!(m.remaining_cap, dec!(150.00));
    assert_eq!(m.state, MandateState::Active);
    let day = NaiveDate::from_ymd_opt(2025, 3, 12).unwrap();
    assert!(manager.executions_on(day).is_empty());
}

#[test]
fn execute_before_valid_from_refuses_without_flip() {
    let (_, manager, plan) = setup();
    let created = manager
        .create_mandates(
            &plan.id,
            &["u1".to_string()],
            dec!(100.00),
            ts("2025-03-14T00:00:00Z"),
            ts("2025-03-18T00:00:00Z"),
        )
        .unwrap();

    // Clock sits at 03-12, before the mandate becomes valid.
    let err = manager
        .execute_mandate(&created[0].id, dec!(10.00), "m-1", "txn-1")
        .unwrap_err();
    assert!(matches!(err, CoreError::MandateExpired { .. }));
    assert_eq!(
        manager.mandate(&created[0].id).unwrap().state,
        MandateState::Active
    );
}

#[test]
fn execute_past_valid_to_flips_state() {
    let (clock, manager, plan) = setup();
    let mid = create_one(&manager, &plan, dec!(100.00));

    clock.advance(Duration::days(4)); // past the 03-15 window end
    let err = manager
        .execute_mandate(&mid, dec!(10.00), "m-1", "txn-1")
        .unwrap_err();
    assert!(matches!(err, CoreError::MandateExpired { .. }));
    assert_eq!(manager.mandate(&mid).unwrap().state, MandateState::Expired);
}

#[test]
fn concurrent_executions_never_exceed_cap() {
    let (_, manager, plan) = setup();
    let mid = create_one(&manager, &plan, dec!(300.00));

    let mut handles = Vec::new();
    for i in 0..8 {
        let manager = manager.clone();
        let mid = mid.clone();
        handles.push(std::thread::spawn(move || {
            manager.execute_mandate(&mid, dec!(50.00), "m-1", &format!("txn-{i}"))
        }));
    }
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 6);

    let m = manager.mandate(&mid).unwrap();
    assert_eq!(m.remaining_cap, dec!(0.00));
    assert_eq!(m.state, MandateState::Exhausted);

    let day = NaiveDate::from_ymd_opt(2025, 3, 12).unwrap();
    let executed_total: rust_decimal::Decimal = manager
        .executions_on(day)
        .iter()
        .map(|e| e.amount)
        .sum();
    assert_eq!(executed_total, dec!(300.00));
}

// =============================================================================
// CANCELLATION
// =============================================================================

#[test]
fn cancel_is_idempotent_on_cancelled() {
    let (_, manager, plan) = setup();
    let mid = create_one(&manager, &plan, dec!(100.00));

    let cancelled = manager.cancel_mandate(&mid).unwrap();
    assert_eq!(cancelled.state, MandateState::Cancelled);
    // A second cancel is a no-op, not an error.
    assert_eq!(
        manager.cancel_mandate(&mid).unwrap().state,
        MandateState::Cancelled
    );

    let err = manager
        .execute_mandate(&mid, dec!(10.00), "m-1", "txn-1")
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidPlanState(_)));
}

#[test]
fn cancel_refused_for_exhausted() {
    let (_, manager, plan) = setup();
    let mid = create_one(&manager, &plan, dec!(50.00));
    manager.execute_mandate(&mid, dec!(50.00), "m-1", "txn-1").unwrap();

    assert!(matches!(
        manager.cancel_mandate(&mid),
        Err(CoreError::InvalidPlanState(_))
    ));
}

// =============================================================================
// SELECTION AND SWEEP
// =============================================================================

#[test]
fn select_mandate_prefers_earliest_window_end() {
    let (clock, manager, plan) = setup();
    let long = manager
        .create_mandates(
            &plan.id,
            &["u1".to_string()],
            dec!(100.00),
            ts("2025-03-10T00:00:00Z"),
            ts("2025-03-19T00:00:00Z"),
        )
        .unwrap();
    let short = manager
        .create_mandates(
            &plan.id,
            &["u1".to_string()],
            dec!(100.00),
            ts("2025-03-10T00:00:00Z"),
            ts("2025-03-14T00:00:00Z"),
        )
        .unwrap();

    let picked = manager
        .select_mandate(&plan.id, "u1", dec!(60.00), clock.now())
        .expect("a mandate should qualify");
    assert_eq!(picked, short[0].id);
    assert_ne!(long[0].id, short[0].id);
}

#[test]
fn sweep_flips_past_window_mandates() {
    let (clock, manager, plan) = setup();
    create_one(&manager, &plan, dec!(100.00)); // valid until 03-15

    clock.advance(Duration::days(4));
    let (_, mandates_flipped) = manager.sweep_expired();
    assert_eq!(mandates_flipped, 1);
    let states: Vec<MandateState> = manager
        .mandates_for_plan(&plan.id)
        .into_iter()
        .map(|m| m.state)
        .collect();
    assert_eq!(states, vec![MandateState::Expired]);
}
