//! Demo data seeding.
//!
//! Populates the merchant directory with three campuses and their food
//! courts, plus two demo plans for manual testing. Every step checks for
//! existing data first so a restart against a persisted database never
//! duplicates rows.

use std::sync::Arc;

use chrono::Duration;
use rust_decimal::Decimal;

use crate::clock::Clock;
use crate::directory::{Campus, Merchant, MerchantDirectory};
use crate::plans::{NewPlan, PlanStore};

// ============================================================================
// FIXTURE DATA
// ============================================================================

const CAMPUSES: &[(&str, &str, &str)] = &[
    ("campus-1", "Tech Campus North", "Sector 62, Noida"),
    ("campus-2", "Business Campus Central", "Connaught Place, Delhi"),
    ("campus-3", "Arts Campus South", "Hauz Khas, Delhi"),
];

// (name, category, icon), stamped once per campus.
const MERCHANT_TEMPLATES: &[(&str, &str, &str)] = &[
    ("Chai Point", "beverages", "☕"),
    ("Pizza Corner", "food", "🍕"),
    ("Sandwich Station", "food", "🥪"),
    ("Juice Bar", "beverages", "🥤"),
    ("Canteen Central", "food", "🍽️"),
    ("Coffee Bean", "beverages", "☕"),
    ("Rolls & Wraps", "food", "🌯"),
    ("Fresh Fruits", "snacks", "🍎"),
    ("Ice Cream Parlor", "desserts", "🍦"),
    ("Bakery Corner", "snacks", "🥐"),
    ("Noodle House", "food", "🍜"),
    ("Tea Stall", "beverages", "🫖"),
    ("Burger Junction", "food", "🍔"),
    ("Smoothie Bar", "beverages", "🥤"),
    ("Snack Attack", "snacks", "🍿"),
    ("Sweet Shop", "desserts", "🍬"),
    ("Pasta Place", "food", "🍝"),
    ("Lemon Water", "beverages", "🍋"),
    ("Chips & More", "snacks", "🥨"),
    ("Cake Corner", "desserts", "🎂"),
];

// ============================================================================
// SEEDING
// ============================================================================

/// Fills an empty directory with the campus/merchant fixture set.
/// Returns (campuses, merchants) inserted; (0, 0) when data already exists.
pub fn seed_directory(directory: &MerchantDirectory) -> (usize, usize) {
    if !directory.is_empty() {
        tracing::debug!(
            merchants = directory.merchant_count(),
            "directory already populated, skipping seed"
        );
        return (0, 0);
    }

    let mut campuses = 0usize;
    let mut merchants = 0usize;

    for (campus_id, campus_name, campus_location) in CAMPUSES {
        directory.insert_campus(Campus {
            id: campus_id.to_string(),
            name: campus_name.to_string(),
            location: campus_location.to_string(),
        });
        campuses += 1;

        for (i, (name, category, icon)) in MERCHANT_TEMPLATES.iter().enumerate() {
            directory.insert_merchant(Merchant {
                id: format!("merchant-{campus_id}-{i}"),
                campus_id: campus_id.to_string(),
                name: name.to_string(),
                category: category.to_string(),
                icon: icon.to_string(),
                location: format!("Shop {}, {campus_name}", i + 1),
                active: true,
            });
            merchants += 1;
        }
    }

    tracing::info!(campuses, merchants, "🌱 seeded merchant directory");
    (campuses, merchants)
}

/// Creates two demo plans with windows relative to now. Skipped whenever any
/// plan already exists, so restarts against a live database stay clean.
pub fn seed_demo_plans(plans: &Arc<PlanStore>, clock: &Clock) -> usize {
    if plans.plan_count() > 0 {
        tracing::debug!(
            plans = plans.plan_count(),
            "plans already exist, skipping demo seed"
        );
        return 0;
    }

    let now = clock.now();
    let demos = [
        NewPlan {
            name: "Birthday Party".to_string(),
            campus_id: "campus-1".to_string(),
            member_ids: (1..=5).map(|i| format!("user-{i}")).collect(),
            cap_per_head: Decimal::new(30000, 2),
            window_start: now + Duration::hours(2),
            window_end: now + Duration::hours(8),
            merchant_whitelist: vec![
                "merchant-campus-1-0".to_string(),
                "merchant-campus-1-1".to_string(),
                "merchant-campus-1-8".to_string(),
            ],
            created_by: "user-1".to_string(),
        },
        NewPlan {
            name: "Movie Night".to_string(),
            campus_id: "campus-1".to_string(),
            member_ids: vec![
                "user-2".to_string(),
                "user-6".to_string(),
                "user-7".to_string(),
                "user-8".to_string(),
            ],
            cap_per_head: Decimal::new(20000, 2),
            window_start: now + Duration::hours(1),
            window_end: now + Duration::hours(5),
            merchant_whitelist: vec![
                "merchant-campus-1-2".to_string(),
                "merchant-campus-1-3".to_string(),
                "merchant-campus-1-14".to_string(),
            ],
            created_by: "user-2".to_string(),
        },
    ];

    let mut created = 0usize;
    for demo in demos {
        let name = demo.name.clone();
        match plans.create_plan(demo) {
            Ok(plan) => {
                tracing::info!(plan_id = %plan.id, name = %name, "🌱 seeded demo plan");
                created += 1;
            }
            Err(e) => tracing::warn!(name = %name, error = %e, "demo plan seed failed"),
        }
    }
    created
}
