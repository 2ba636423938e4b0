use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use voucher_core::auth::SecureLink;
use voucher_core::types::GeneratedVoucher;

use crate::{
    error::{ApiResult, AppError},
    state::{AppState, RequestId},
};

#[derive(Serialize)]
struct PrintQueueResponse {
    vouchers: Vec<GeneratedVoucher>,
}

#[derive(Serialize)]
struct VoucherResponse {
    voucher: GeneratedVoucher,
}

#[derive(Serialize)]
struct RegeneratedResponse {
    voucher: GeneratedVoucher,
    html: String,
}

#[derive(Debug, Deserialize)]
struct SecureLinkQuery {
    session_id: String,
    ttl: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct UsageQuery {
    email: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UsageResponse {
    code: String,
    customer_email: Option<String>,
    redemptions: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    coupon_count: usize,
}

/// Staff-only routes. Mounted behind the admin token check.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/admin/vouchers/print-queue", get(print_queue))
        .route(
            "/admin/vouchers/{session_id}/regenerate-pdf",
            post(regenerate_document),
        )
        .route(
            "/admin/vouchers/{session_id}/mark-fulfilled",
            post(mark_fulfilled),
        )
        .route("/admin/vouchers/secure-link", get(secure_link))
        .route("/admin/coupons/{code}/usage", get(coupon_usage))
        .route("/admin/coupons/refresh", post(refresh_coupons))
        .with_state(state)
}

async fn print_queue(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
) -> ApiResult<Json<PrintQueueResponse>> {
    let vouchers = state
        .fulfillment
        .print_queue()
        .await
        .map_err(|err| AppError::from_checkout(err).with_request_id(&request_id.0))?;
    Ok(Json(PrintQueueResponse { vouchers }))
}

async fn regenerate_document(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<RegeneratedResponse>> {
    let rendered = state
        .fulfillment
        .regenerate_document(&session_id)
        .await
        .map_err(|err| AppError::from_checkout(err).with_request_id(&request_id.0))?;
    Ok(Json(RegeneratedResponse {
        voucher: rendered.voucher,
        html: rendered.html,
    }))
}

async fn mark_fulfilled(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<VoucherResponse>> {
    let voucher = state
        .fulfillment
        .mark_fulfilled(&session_id)
        .await
        .map_err(|err| AppError::from_checkout(err).with_request_id(&request_id.0))?;
    Ok(Json(VoucherResponse { voucher }))
}

async fn secure_link(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    query: Result<Query<SecureLinkQuery>, QueryRejection>,
) -> ApiResult<Json<SecureLink>> {
    let Query(query) = query
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()).with_request_id(&request_id.0))?;
    let link = state
        .fulfillment
        .secure_link(&query.session_id, query.ttl)
        .await
        .map_err(|err| AppError::from_checkout(err).with_request_id(&request_id.0))?;
    Ok(Json(link))
}

async fn coupon_usage(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(code): Path<String>,
    query: Result<Query<UsageQuery>, QueryRejection>,
) -> ApiResult<Json<UsageResponse>> {
    let Query(query) = query
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()).with_request_id(&request_id.0))?;
    let email = query
        .email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty());
    let redemptions = state
        .fulfillment
        .coupon_usage(&code, email.as_deref())
        .await
        .map_err(|err| AppError::from_checkout(err).with_request_id(&request_id.0))?;
    Ok(Json(UsageResponse {
        code: code.trim().to_uppercase(),
        customer_email: email,
        redemptions,
    }))
}

async fn refresh_coupons(State(state): State<AppState>) -> Json<RefreshResponse> {
    let coupon_count = state.coupons.force_refresh().await;
    info!(coupon_count, "coupon cache refreshed");
    Json(RefreshResponse { coupon_count })
}
