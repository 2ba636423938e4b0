use axum::{body::Body, http::Request, middleware::Next, response::Response};
use nanoid::nanoid;
use tracing::{info_span, Instrument};

use crate::state::RequestId;

const HEADER: &str = "X-Request-Id";

/// Tags every request with an id, reusing a well-formed inbound one so a
/// storefront proxy can correlate its own logs.
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| is_acceptable(v))
        .map(str::to_string)
        .unwrap_or_else(|| format!("req_{}", nanoid!(16)));
    req.extensions_mut().insert(RequestId(request_id.clone()));

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path()
    );

    let mut resp = next.run(req).instrument(span).await;
    if let Ok(value) = request_id.parse() {
        resp.headers_mut().insert(HEADER, value);
    }
    resp
}

fn is_acceptable(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 64
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
