//! HTTP surface: shared state, error mapping, idempotency plumbing.

pub mod handlers;
pub mod routes;

pub use routes::create_router;

use std::sync::Arc;

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};
use std::future::Future;

use crate::clock::Clock;
use crate::db::Db;
use crate::directory::MerchantDirectory;
use crate::error::CoreError;
use crate::idempotency::IdempotencyGate;
use crate::instruments::InstrumentManager;
use crate::ledger::Ledger;
use crate::models::Config;
use crate::payments::PaymentEngine;
use crate::plans::PlanStore;
use crate::recon::ReconEngine;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const REPLAY_HEADER: &str = "x-idempotent-replay";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub clock: Clock,
    pub db: Arc<Db>,
    pub directory: Arc<MerchantDirectory>,
    pub plans: Arc<PlanStore>,
    pub instruments: Arc<InstrumentManager>,
    pub ledger: Arc<Ledger>,
    pub payments: Arc<PaymentEngine>,
    pub recon: Arc<ReconEngine>,
    pub gate: Arc<IdempotencyGate>,
}

// ===== Error Handling =====

#[derive(Debug)]
pub enum ApiError {
    Core(CoreError),
    Internal(anyhow::Error),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError::Core(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Internal(err.into())
    }
}

fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        CoreError::InvalidPlanState(_) => StatusCode::CONFLICT,
        CoreError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::MandateExhausted { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::MerchantNotAllowed { .. } => StatusCode::FORBIDDEN,
        CoreError::VoucherExpired { .. } => StatusCode::GONE,
        CoreError::MandateExpired { .. } => StatusCode::GONE,
        CoreError::TransactionNotFound { .. } => StatusCode::NOT_FOUND,
        CoreError::GuardrailBlocked(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::LedgerRejected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match &self {
            ApiError::Core(err) => {
                if matches!(err, CoreError::LedgerRejected(_)) {
                    tracing::error!("ledger rejected a posting: {err}");
                }
                (status_for(err), err.kind(), err.to_string())
            }
            ApiError::Internal(err) => {
                tracing::error!("internal error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": { "kind": kind, "message": message },
        }));

        (status, body).into_response()
    }
}

// ===== Idempotency plumbing =====

pub fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Runs a mutating operation behind the idempotency gate. Replays answer
/// with the stored body plus the replay marker header.
pub async fn idempotent<F, Fut>(
    state: &AppState,
    headers: &HeaderMap,
    op: F,
) -> Result<Response, ApiError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, ApiError>>,
{
    let outcome = state.gate.execute(idempotency_key(headers), op).await?;
    let mut response = Json(outcome.body).into_response();
    if outcome.replayed {
        response
            .headers_mut()
            .insert(REPLAY_HEADER, HeaderValue::from_static("true"));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_documented_statuses() {
        assert_eq!(
            status_for(&CoreError::validation("x")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&CoreError::not_found("plan", "p1")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&CoreError::InvalidPlanState("closed".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&CoreError::MerchantNotAllowed {
                merchant_id: "m".into()
            }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&CoreError::GuardrailBlocked("over".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&CoreError::MandateExpired {
                mandate_id: "md".into()
            }),
            StatusCode::GONE
        );
    }

    #[test]
    fn idempotency_key_ignores_blank_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(idempotency_key(&headers), None);

        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static("  "));
        assert_eq!(idempotency_key(&headers), None);

        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static("abc-1"));
        assert_eq!(idempotency_key(&headers), Some("abc-1".to_string()));
    }
}
