//! Request handlers for the payments API.
//!
//! Mutating handlers run inside [`idempotent`], so a repeated
//! `Idempotency-Key` replays the stored body instead of re-executing.
//! Read handlers bypass the gate entirely.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{Json, Response},
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::CoreError;
use crate::models::{PaymentMode, PlanStatus};
use crate::payments::{NewIntent, RedeemItem};
use crate::plans::NewPlan;

use super::{idempotent, ApiError, AppState};

// ===== Plans =====

#[derive(Debug, Deserialize)]
pub struct CreatePlanRequest {
    pub name: String,
    pub campus_id: String,
    #[serde(default)]
    pub member_ids: Vec<String>,
    pub cap_per_head: Decimal,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    #[serde(default)]
    pub merchant_whitelist: Vec<String>,
    pub created_by: String,
}

pub async fn create_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreatePlanRequest>,
) -> Result<Response, ApiError> {
    let plans = state.plans.clone();
    idempotent(&state, &headers, move || async move {
        let plan = plans.create_plan(NewPlan {
            name: req.name,
            campus_id: req.campus_id,
            member_ids: req.member_ids,
            cap_per_head: req.cap_per_head,
            window_start: req.window_start,
            window_end: req.window_end,
            merchant_whitelist: req.merchant_whitelist,
            created_by: req.created_by,
        })?;
        let members = plan.member_ids.clone();
        Ok(json!({ "plan": plan, "members": members }))
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct ListPlansQuery {
    pub user: Option<String>,
}

pub async fn list_plans(
    State(state): State<AppState>,
    Query(query): Query<ListPlansQuery>,
) -> Result<Json<Value>, ApiError> {
    let plans = match query.user.as_deref() {
        Some(user) => state.plans.plans_for_user(user),
        None => state.plans.all_plans(),
    };
    let count = plans.len();
    Ok(Json(json!({ "plans": plans, "count": count })))
}

pub async fn get_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let plan = state.plans.get_plan(&plan_id)?;
    Ok(Json(json!({ "plan": plan })))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePlanStatusRequest {
    pub status: String,
}

pub async fn update_plan_status(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpdatePlanStatusRequest>,
) -> Result<Response, ApiError> {
    let plans = state.plans.clone();
    idempotent(&state, &headers, move || async move {
        let to = PlanStatus::parse(&req.status).ok_or_else(|| {
            CoreError::validation(format!("unknown plan status {:?}", req.status))
        })?;
        let plan = plans.update_status(&plan_id, to)?;
        Ok(json!({ "plan": plan }))
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct UpdateWhitelistRequest {
    #[serde(default)]
    pub merchant_whitelist: Vec<String>,
}

pub async fn update_plan_whitelist(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpdateWhitelistRequest>,
) -> Result<Response, ApiError> {
    let plans = state.plans.clone();
    idempotent(&state, &headers, move || async move {
        let plan = plans.update_whitelist(&plan_id, req.merchant_whitelist)?;
        Ok(json!({ "plan": plan }))
    })
    .await
}

// ===== Vouchers =====

#[derive(Debug, Deserialize)]
pub struct MintVouchersRequest {
    pub plan_id: String,
    pub member_user_ids: Vec<String>,
    pub amount: Decimal,
    #[serde(default)]
    pub merchant_list: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

pub async fn mint_vouchers(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<MintVouchersRequest>,
) -> Result<Response, ApiError> {
    let instruments = state.instruments.clone();
    idempotent(&state, &headers, move || async move {
        let vouchers = instruments.mint_vouchers(
            &req.plan_id,
            &req.member_user_ids,
            req.amount,
            req.expires_at,
            req.merchant_list,
        )?;
        Ok(json!({ "vouchers": vouchers }))
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct RedeemItemRequest {
    pub voucher_id: String,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct RedeemVouchersRequest {
    pub merchant_id: String,
    pub items: Vec<RedeemItemRequest>,
}

pub async fn redeem_vouchers(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RedeemVouchersRequest>,
) -> Result<Response, ApiError> {
    let payments = state.payments.clone();
    idempotent(&state, &headers, move || async move {
        let items = req
            .items
            .into_iter()
            .map(|i| RedeemItem {
                voucher_id: i.voucher_id,
                amount: i.amount,
            })
            .collect();
        let outcomes = payments.redeem_batch(&req.merchant_id, items)?;
        let (redeemed, failed): (Vec<_>, Vec<_>) =
            outcomes.into_iter().partition(|o| o.status == "redeemed");
        let (total_redeemed, total_failed) = (redeemed.len(), failed.len());
        Ok(json!({
            "result": {
                "redeemed": redeemed,
                "failed": failed,
                "total_redeemed": total_redeemed,
                "total_failed": total_failed,
            }
        }))
    })
    .await
}

pub async fn vouchers_for_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let vouchers = state.instruments.vouchers_for_plan(&plan_id);
    let count = vouchers.len();
    Ok(Json(json!({ "vouchers": vouchers, "count": count })))
}

// ===== Mandates =====

#[derive(Debug, Deserialize)]
pub struct CreateMandatesRequest {
    pub plan_id: String,
    pub member_user_ids: Vec<String>,
    pub cap_amount: Decimal,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
}

pub async fn create_mandates(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateMandatesRequest>,
) -> Result<Response, ApiError> {
    let instruments = state.instruments.clone();
    idempotent(&state, &headers, move || async move {
        let mandates = instruments.create_mandates(
            &req.plan_id,
            &req.member_user_ids,
            req.cap_amount,
            req.valid_from,
            req.valid_to,
        )?;
        Ok(json!({ "mandates": mandates }))
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct ExecuteMandateRequest {
    pub mandate_id: String,
    pub amount: Decimal,
    pub merchant_id: String,
}

pub async fn execute_mandate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ExecuteMandateRequest>,
) -> Result<Response, ApiError> {
    let payments = state.payments.clone();
    idempotent(&state, &headers, move || async move {
        let (execution, remaining_cap) =
            payments.execute_mandate_direct(&req.mandate_id, req.amount, &req.merchant_id)?;
        Ok(json!({
            "result": {
                "mandate_id": execution.mandate_id,
                "amount": execution.amount,
                "status": "success",
                "remaining_cap": remaining_cap,
                "execution_id": execution.id,
            }
        }))
    })
    .await
}

pub async fn cancel_mandate(
    State(state): State<AppState>,
    Path(mandate_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let instruments = state.instruments.clone();
    idempotent(&state, &headers, move || async move {
        let mandate = instruments.cancel_mandate(&mandate_id)?;
        Ok(json!({ "mandate": mandate }))
    })
    .await
}

pub async fn mandates_for_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let mandates = state.instruments.mandates_for_plan(&plan_id);
    let count = mandates.len();
    Ok(Json(json!({ "mandates": mandates, "count": count })))
}

// ===== Payments =====

#[derive(Debug, Deserialize)]
pub struct CreateIntentRequest {
    pub plan_id: String,
    pub member_user_id: String,
    pub merchant_id: String,
    pub amount: Decimal,
    pub mode: PaymentMode,
}

pub async fn create_payment_intent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateIntentRequest>,
) -> Result<Response, ApiError> {
    let payments = state.payments.clone();
    idempotent(&state, &headers, move || async move {
        let outcome = payments.create_intent(NewIntent {
            plan_id: req.plan_id,
            member_user_id: req.member_user_id,
            merchant_id: req.merchant_id,
            amount: req.amount,
            mode: req.mode,
        })?;
        let intent_id = outcome.transaction.intent_id.clone();
        Ok(json!({
            "intent_id": intent_id,
            "transaction": outcome.transaction,
            "guardrail_required": outcome.guardrail_required,
        }))
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub intent_id: String,
    /// "completed" or "failed" as reported by the caller's rail leg.
    pub status: String,
    pub rrn_stub: Option<String>,
    pub failure_reason: Option<String>,
}

pub async fn confirm_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ConfirmPaymentRequest>,
) -> Result<Response, ApiError> {
    let payments = state.payments.clone();
    idempotent(&state, &headers, move || async move {
        let approved = match req.status.as_str() {
            "completed" => true,
            "failed" => false,
            other => {
                return Err(
                    CoreError::validation(format!("unknown confirm status {other:?}")).into(),
                )
            }
        };
        let outcome = payments
            .confirm(&req.intent_id, approved, req.rrn_stub, req.failure_reason)
            .await?;
        Ok(json!({
            "transaction": outcome.transaction,
            "replayed": outcome.replayed,
        }))
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    pub plan_id: Option<String>,
    pub user: Option<String>,
    pub limit: Option<usize>,
}

pub async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<Value>, ApiError> {
    let transactions = state.payments.transactions(
        query.plan_id.as_deref(),
        query.user.as_deref(),
        query.limit.unwrap_or(100),
    );
    let count = transactions.len();
    Ok(Json(json!({
        "transactions": transactions,
        "count": count,
    })))
}

// ===== Ledger =====

pub async fn ledger_transaction(
    State(state): State<AppState>,
    Path(txn_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let entries = state.ledger.entries_for_transaction(&txn_id);
    if entries.is_empty() {
        return Err(CoreError::TransactionNotFound { intent_id: txn_id }.into());
    }
    let count = entries.len();
    Ok(Json(json!({
        "transaction_id": txn_id,
        "entries": entries,
        "count": count,
    })))
}

#[derive(Debug, Deserialize)]
pub struct LedgerBalanceQuery {
    pub account: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub async fn ledger_balance(
    State(state): State<AppState>,
    Query(query): Query<LedgerBalanceQuery>,
) -> Result<Json<Value>, ApiError> {
    let account = query
        .account
        .filter(|a| !a.is_empty())
        .ok_or_else(|| CoreError::validation("account query parameter is required"))?;
    let from = query.from.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let to = query.to.unwrap_or_else(|| state.clock.now());
    let balance = state.ledger.sum_account_range(&account, from, to);
    Ok(Json(json!({
        "account": account,
        "balance": balance,
        "from": from,
        "to": to,
    })))
}

// ===== Reconciliation =====

#[derive(Debug, Default, Deserialize)]
pub struct RunReconRequest {
    pub day: Option<NaiveDate>,
}

pub async fn run_recon(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RunReconRequest>>,
) -> Result<Response, ApiError> {
    let recon = state.recon.clone();
    let clock = state.clock.clone();
    idempotent(&state, &headers, move || async move {
        let req = body.map(|Json(r)| r).unwrap_or_default();
        let day = req.day.unwrap_or_else(|| clock.now().date_naive());
        let report = recon.run(day);
        Ok(json!({ "report": report }))
    })
    .await
}

pub async fn get_recon_report(
    State(state): State<AppState>,
    Path(day): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let day = NaiveDate::parse_from_str(&day, "%Y-%m-%d")
        .map_err(|_| CoreError::validation(format!("invalid day {day:?}, expected YYYY-MM-DD")))?;
    let report = state
        .recon
        .report(day)
        .ok_or_else(|| CoreError::not_found("recon report", day.to_string()))?;
    Ok(Json(json!({ "report": report })))
}

pub async fn list_recon_reports(
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    let reports = state.recon.reports();
    let count = reports.len();
    Ok(Json(json!({ "reports": reports, "count": count })))
}

// ===== Merchants =====

#[derive(Debug, Deserialize)]
pub struct ListMerchantsQuery {
    pub campus_id: Option<String>,
    pub category: Option<String>,
}

pub async fn list_merchants(
    State(state): State<AppState>,
    Query(query): Query<ListMerchantsQuery>,
) -> Result<Json<Value>, ApiError> {
    let merchants = state
        .directory
        .merchants(query.campus_id.as_deref(), query.category.as_deref());
    let count = merchants.len();
    Ok(Json(json!({ "merchants": merchants, "count": count })))
}

pub async fn get_merchant(
    State(state): State<AppState>,
    Path(merchant_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let merchant = state
        .directory
        .merchant(&merchant_id)
        .ok_or_else(|| CoreError::not_found("merchant", &merchant_id))?;
    Ok(Json(json!({ "merchant": merchant })))
}

#[derive(Debug, Deserialize)]
pub struct ListCategoriesQuery {
    pub campus_id: Option<String>,
}

pub async fn list_categories(
    State(state): State<AppState>,
    Query(query): Query<ListCategoriesQuery>,
) -> Result<Json<Value>, ApiError> {
    let categories = state.directory.categories(query.campus_id.as_deref());
    Ok(Json(json!({ "categories": categories })))
}

// ===== Admin =====

pub async fn admin_stats(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(Json(json!({
        "plans": { "total": state.plans.plan_count() },
        "directory": {
            "campuses": state.directory.campuses().len(),
            "merchants": state.directory.merchant_count(),
        },
        "instruments": state.instruments.stats(),
        "ledger": {
            "stats": state.ledger.stats(),
            "entries": state.ledger.entry_count(),
            "balanced": state.ledger.verify_balanced(),
        },
        "payments": state.payments.stats(),
        "idempotency": state.gate.stats(),
        "recon": { "reports": state.recon.report_count() },
        "timestamp": state.clock.now(),
    })))
}
