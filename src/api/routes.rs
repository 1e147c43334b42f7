use axum::{
    middleware,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::Serialize;

use crate::middleware::request_logging;

use super::{handlers, AppState};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/plans",
            post(handlers::create_plan).get(handlers::list_plans),
        )
        .route("/api/plans/:id", get(handlers::get_plan))
        .route("/api/plans/:id/status", post(handlers::update_plan_status))
        .route(
            "/api/plans/:id/whitelist",
            put(handlers::update_plan_whitelist),
        )
        .route("/api/vouchers/mint", post(handlers::mint_vouchers))
        .route("/api/vouchers/redeem", post(handlers::redeem_vouchers))
        .route(
            "/api/vouchers/plan/:plan_id",
            get(handlers::vouchers_for_plan),
        )
        .route("/api/mandates/create", post(handlers::create_mandates))
        .route("/api/mandates/execute", post(handlers::execute_mandate))
        .route("/api/mandates/:id/cancel", post(handlers::cancel_mandate))
        .route(
            "/api/mandates/plan/:plan_id",
            get(handlers::mandates_for_plan),
        )
        .route("/api/payments/intent", post(handlers::create_payment_intent))
        .route("/api/payments/confirm", post(handlers::confirm_payment))
        .route(
            "/api/payments/transactions",
            get(handlers::list_transactions),
        )
        .route(
            "/api/ledger/transaction/:txn_id",
            get(handlers::ledger_transaction),
        )
        .route("/api/ledger/balance", get(handlers::ledger_balance))
        .route("/api/recon/run", post(handlers::run_recon))
        .route("/api/recon", get(handlers::list_recon_reports))
        .route("/api/recon/:day", get(handlers::get_recon_report))
        .route("/api/merchants", get(handlers::list_merchants))
        .route(
            "/api/merchants/categories/list",
            get(handlers::list_categories),
        )
        .route("/api/merchants/:id", get(handlers::get_merchant))
        .route("/api/admin/stats", get(handlers::admin_stats))
        .layer(middleware::from_fn(request_logging))
        .with_state(state)
}

// ===== Route Handlers =====

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}
