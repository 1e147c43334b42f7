//! Adversarial voucher lifecycle tests.
//!
//! These verify the pool cap, merchant restriction, expiry handling and
//! the per-voucher lock under concurrent redemption. They are designed to
//! fail without proper enforcement.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::CoreError;
use crate::instruments::{InstrumentManager, SpendingInstrument};
use crate::models::{Plan, VoucherState};
use crate::plans::{NewPlan, PlanStore};

// =============================================================================
// HELPERS
// =============================================================================

fn ts(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

fn members() -> Vec<String> {
    vec!["u1".into(), "u2".into(), "u3".into(), "u4".into(), "u5".into()]
}

/// Clock pinned mid-window, a five member plan with cap 300, no whitelist.
fn setup() -> (Clock, Arc<PlanStore>, Arc<InstrumentManager>, Plan) {
    let clock = Clock::fixed(ts("2025-03-12T09:00:00Z"));
    let plans = Arc::new(PlanStore::new(clock.clone(), None));
    let plan = plans
        .create_plan(NewPlan {
            name: "Goa trip".into(),
            campus_id: "campus-1".into(),
            member_ids: members(),
            cap_per_head: dec!(300.00),
            window_start: ts("2025-03-10T00:00:00Z"),
            window_end: ts("2025-03-20T00:00:00Z"),
            merchant_whitelist: vec![],
            created_by: "u1".into(),
        })
        .expect("plan should create");
    let manager = Arc::new(InstrumentManager::new(plans.clone(), clock.clone(), None));
    (clock, plans, manager, plan)
}

fn mint_all(manager: &InstrumentManager, plan: &Plan) -> Vec<String> {
    manager
        .mint_vouchers(
            &plan.id,
            &plan.member_ids,
            dec!(300.00),
            ts("2025-03-15T00:00:00Z"),
            vec![],
        )
        .expect("mint should succeed")
        .into_iter()
        .map(|v| v.id)
        .collect()
}

// =============================================================================
// MINTING AND THE FIXED POOL
// =============================================================================

#[test]
fn mint_issues_one_voucher_per_member() {
    let (_, _, manager, plan) = setup();
    let ids = mint_all(&manager, &plan);
    assert_eq!(ids.len(), 5);
    assert_eq!(manager.minted_total(&plan.id), dec!(1500.00));
    for id in &ids {
        let v = manager.voucher(id).unwrap();
        assert_eq!(v.state, VoucherState::Active);
        assert_eq!(v.remaining_amount, dec!(300.00));
    }
}

#[test]
fn mint_beyond_pool_rejected() {
    let (_, _, manager, plan) = setup();
    mint_all(&manager, &plan);

    // Pool is cap_per_head * members = 1500.00, already fully minted.
    let err = manager
        .mint_vouchers(
            &plan.id,
            &["u1".to_string()],
            dec!(1.00),
            ts("2025-03-15T00:00:00Z"),
            vec![],
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::InsufficientBalance { .. }));
    assert_eq!(manager.vouchers_for_plan(&plan.id).len(), 5);
}

#[test]
fn mint_rejects_non_member() {
    let (_, _, manager, plan) = setup();
    let err = manager
        .mint_vouchers(
            &plan.id,
            &["intruder".to_string()],
            dec!(50.00),
            ts("2025-03-15T00:00:00Z"),
            vec![],
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}

#[test]
fn mint_rejects_expiry_outside_plan_window() {
    let (_, _, manager, plan) = setup();
    let err = manager
        .mint_vouchers(
            &plan.id,
            &["u1".to_string()],
            dec!(50.00),
            ts("2025-03-25T00:00:00Z"),
            vec![],
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}

#[test]
fn mint_inherits_plan_whitelist_when_list_omitted() {
    let clock = Clock::fixed(ts("2025-03-12T09:00:00Z"));
    let plans = Arc::new(PlanStore::new(clock.clone(), None));
    let plan = plans
        .create_plan(NewPlan {
            name: "Canteen only".into(),
            campus_id: "campus-1".into(),
            member_ids: vec!["u1".into()],
            cap_per_head: dec!(100.00),
            window_start: ts("2025-03-10T00:00:00Z"),
            window_end: ts("2025-03-20T00:00:00Z"),
            merchant_whitelist: vec!["m-canteen".into()],
            created_by: "u1".into(),
        })
        .unwrap();
    let manager = InstrumentManager::new(plans, clock, None);

    let minted = manager
        .mint_vouchers(
            &plan.id,
            &["u1".to_string()],
            dec!(100.00),
            ts("2025-03-15T00:00:00Z"),
            vec![],
        )
        .unwrap();
    assert_eq!(minted[0].merchant_list, vec!["m-canteen".to_string()]);
}

// =============================================================================
// REDEMPTION
// =============================================================================

#[test]
fn partial_redemptions_deplete_then_flip_state() {
    let (_, _, manager, plan) = setup();
    let ids = mint_all(&manager, &plan);
    let vid = &ids[0];

    let first = manager.redeem_voucher(vid, dec!(120.00), "m-1", "txn-1").unwrap();
    assert_eq!(first.amount, dec!(120.00));
    assert_eq!(manager.voucher(vid).unwrap().remaining_amount, dec!(180.00));

    manager.redeem_voucher(vid, dec!(180.00), "m-1", "txn-2").unwrap();
    let drained = manager.voucher(vid).unwrap();
    assert_eq!(drained.remaining_amount, dec!(0.00));
    assert_eq!(drained.state, VoucherState::Redeemed);

    let err = manager
        .redeem_voucher(vid, dec!(1.00), "m-1", "txn-3")
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidPlanState(_)));
}

#[test]
fn insufficient_balance_leaves_voucher_untouched() {
    let (_, _, manager, plan) = setup();
    let ids = mint_all(&manager, &plan);
    let vid = &ids[0];
    manager.redeem_voucher(vid, dec!(120.00), "m-1", "txn-1").unwrap();

    // Remaining is 180.00; a 200.00 redeem must change nothing.
    let err = manager
        .redeem_voucher(vid, dec!(200.00), "m-1", "txn-2")
        .unwrap_err();
    assert_eq!(
        err,
        CoreError::InsufficientBalance {
            requested: dec!(200.00),
            remaining: dec!(180.00),
        }
    );
    let v = manager.voucher(vid).unwrap();
    assert_eq!(v.remaining_amount, dec!(180.00));
    assert_eq!(v.state, VoucherState::Active);

    let day = NaiveDate::from_ymd_opt(2025, 3, 12).unwrap();
    assert_eq!(manager.redemptions_on(day).len(), 1);
}

#[test]
fn merchant_restriction_enforced() {
    let (_, _, manager, plan) = setup();
    let minted = manager
        .mint_vouchers(
            &plan.id,
            &["u1".to_string()],
            dec!(100.00),
            ts("2025-03-15T00:00:00Z"),
            vec!["m-allowed".into()],
        )
        .unwrap();

    let err = manager
        .redeem_voucher(&minted[0].id, dec!(10.00), "m-denied", "txn-1")
        .unwrap_err();
    assert!(matches!(err, CoreError::MerchantNotAllowed { .. }));
    assert!(manager
        .redeem_voucher(&minted[0].id, dec!(10.00), "m-allowed", "txn-2")
        .is_ok());
}

#[test]
fn redeem_after_expiry_flips_state() {
    let (clock, _, manager, plan) = setup();
    let ids = mint_all(&manager, &plan);
    let vid = &ids[0];

    clock.advance(Duration::days(4)); // past the 03-15 expiry
    let err = manager
        .redeem_voucher(vid, dec!(10.00), "m-1", "txn-1")
        .unwrap_err();
    assert!(matches!(err, CoreError::VoucherExpired { .. }));

    let v = manager.voucher(vid).unwrap();
    assert_eq!(v.state, VoucherState::Expired);
    assert_eq!(v.remaining_amount, dec!(300.00));
    assert_eq!(v.status(clock.now()).state, "expired");
}

// =============================================================================
// CONCURRENT REDEMPTION (NO DOUBLE SPEND)
// =============================================================================

#[test]
fn concurrent_redemptions_never_overspend() {
    let (_, _, manager, plan) = setup();
    let ids = mint_all(&manager, &plan);
    let vid = ids[0].clone();

    // 8 racers x 50.00 against a 300.00 voucher: exactly 6 can win.
    let mut handles = Vec::new();
    for i in 0..8 {
        let manager = manager.clone();
        let vid = vid.clone();
        handles.push(std::thread::spawn(move || {
            manager.redeem_voucher(&vid, dec!(50.00), "m-1", &format!("txn-{i}"))
        }));
    }
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let failures = results.iter().filter(|r| r.is_err()).count();
    assert_eq!(successes, 6);
    assert_eq!(failures, 2);
    for r in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(
            r.as_ref().unwrap_err(),
            CoreError::InsufficientBalance { .. } | CoreError::InvalidPlanState(_)
        ));
    }

    let v = manager.voucher(&vid).unwrap();
    assert_eq!(v.remaining_amount, dec!(0.00));
    assert_eq!(v.state, VoucherState::Redeemed);

    let day = NaiveDate::from_ymd_opt(2025, 3, 12).unwrap();
    let redeemed_total: rust_decimal::Decimal = manager
        .redemptions_on(day)
        .iter()
        .filter(|r| r.voucher_id == vid)
        .map(|r| r.amount)
        .sum();
    assert_eq!(redeemed_total, dec!(300.00));
}

// =============================================================================
// SELECTION AND SWEEP
// =============================================================================

#[test]
fn select_voucher_prefers_earliest_expiry() {
    let (clock, _, manager, plan) = setup();
    let late = manager
        .mint_vouchers(
            &plan.id,
            &["u1".to_string()],
            dec!(100.00),
            ts("2025-03-18T00:00:00Z"),
            vec![],
        )
        .unwrap();
    let early = manager
        .mint_vouchers(
            &plan.id,
            &["u1".to_string()],
            dec!(100.00),
            ts("2025-03-14T00:00:00Z"),
            vec![],
        )
        .unwrap();

    let picked = manager
        .select_voucher(&plan.id, "u1", dec!(50.00), "m-1", clock.now())
        .expect("a voucher should qualify");
    assert_eq!(picked, early[0].id);

    // Too large for either voucher: nothing qualifies.
    assert!(manager
        .select_voucher(&plan.id, "u1", dec!(150.00), "m-1", clock.now())
        .is_none());
    assert_ne!(late[0].id, early[0].id);
}

#[test]
fn sweep_flips_only_past_expiry_vouchers() {
    let (clock, _, manager, plan) = setup();
    manager
        .mint_vouchers(
            &plan.id,
            &["u1".to_string()],
            dec!(100.00),
            ts("2025-03-13T00:00:00Z"),
            vec![],
        )
        .unwrap();
    manager
        .mint_vouchers(
            &plan.id,
            &["u2".to_string()],
            dec!(100.00),
            ts("2025-03-19T00:00:00Z"),
            vec![],
        )
        .unwrap();

    clock.advance(Duration::days(2)); // now 2025-03-14, first voucher past expiry
    let (vouchers_flipped, mandates_flipped) = manager.sweep_expired();
    assert_eq!(vouchers_flipped, 1);
    assert_eq!(mandates_flipped, 0);

    let states: Vec<VoucherState> = manager
        .vouchers_for_plan(&plan.id)
        .into_iter()
        .map(|v| v.state)
        .collect();
    assert!(states.contains(&VoucherState::Expired));
    assert!(states.contains(&VoucherState::Active));

    // Sweep is idempotent.
    assert_eq!(manager.sweep_expired(), (0, 0));
}
