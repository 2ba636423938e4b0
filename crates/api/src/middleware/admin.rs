use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use tracing::warn;
use voucher_core::auth::admin_token_matches;

use crate::{
    error::{ApiError, AppError},
    state::{AppState, RequestId},
};

pub const ADMIN_TOKEN_HEADER: &str = "admin-token";

pub async fn admin_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();

    let provided = req
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !admin_token_matches(&state.settings.admin_token, provided) {
        warn!(path = %req.uri().path(), "rejected admin request");
        return Err(AppError::Unauthorized.with_request_id(&request_id));
    }

    Ok(next.run(req).await)
}
