use axum::{
    extract::{rejection::QueryRejection, Query, State},
    response::Html,
    routing::get,
    Extension, Router,
};
use serde::Deserialize;
use voucher_core::CheckoutError;

use crate::{
    error::{ApiResult, AppError},
    state::{AppState, RequestId},
};

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    session_id: String,
    expires: i64,
    sig: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/vouchers/download", get(download))
        .with_state(state)
}

async fn download(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    query: Result<Query<DownloadQuery>, QueryRejection>,
) -> ApiResult<Html<String>> {
    let Query(query) = query.map_err(|_| {
        AppError::from_checkout(CheckoutError::InvalidLink).with_request_id(&request_id.0)
    })?;
    let rendered = state
        .fulfillment
        .resolve_download(&query.session_id, query.expires, &query.sig)
        .await
        .map_err(|err| AppError::from_checkout(err).with_request_id(&request_id.0))?;
    Ok(Html(rendered.html))
}
