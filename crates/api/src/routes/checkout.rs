use axum::{
    extract::{rejection::JsonRejection, Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use voucher_core::checkout::{CheckoutRequest, CheckoutSession};
use voucher_core::success::SuccessOutcome;

use crate::{
    error::{ApiResult, AppError},
    state::{AppState, RequestId},
};

#[derive(Debug, Deserialize)]
struct SuccessQuery {
    session_id: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/checkout/create-session", post(create_session))
        .route("/checkout/success", get(checkout_success))
        .with_state(state)
}

async fn create_session(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> ApiResult<Json<CheckoutSession>> {
    let Json(payload) = payload
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()).with_request_id(&request_id.0))?;

    let session = state
        .checkout
        .create_checkout_session(payload)
        .await
        .map_err(|err| AppError::from_checkout(err).with_request_id(&request_id.0))?;

    Ok(Json(session))
}

/// Called by the storefront when the customer lands back from payment.
/// The confirmation email keeps running after the response is sent.
async fn checkout_success(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Query(query): Query<SuccessQuery>,
) -> ApiResult<Json<SuccessOutcome>> {
    let session_id = query
        .session_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| {
            AppError::BadRequest("session_id is required".to_string()).with_request_id(&request_id.0)
        })?;

    let outcome = state
        .success
        .handle_successful_payment(&session_id)
        .await
        .map_err(|err| AppError::from_checkout(err).with_request_id(&request_id.0))?;

    Ok(Json(outcome))
}
