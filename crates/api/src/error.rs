use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use tracing::{error, warn};
use voucher_core::CheckoutError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub request_id: String,
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized,
    Forbidden(String),
    NotFound(String),
    PaymentRequired(String),
    BadGateway,
    Internal,
}

#[derive(Debug)]
pub struct ApiError {
    pub error: AppError,
    pub request_id: String,
}

impl AppError {
    pub fn with_request_id(self, request_id: &str) -> ApiError {
        ApiError {
            error: self,
            request_id: request_id.to_string(),
        }
    }

    /// Customer-safe mapping. Collaborator and storage details only go to the log.
    pub fn from_checkout(err: CheckoutError) -> Self {
        match err {
            CheckoutError::Validation(msg) => AppError::BadRequest(msg),
            CheckoutError::NotFound(what) => AppError::NotFound(format!("{} not found", what)),
            CheckoutError::InvalidLink => {
                AppError::Forbidden("link is invalid or expired".to_string())
            }
            CheckoutError::PaymentNotCompleted(status) => {
                AppError::PaymentRequired(format!("payment not completed ({})", status))
            }
            CheckoutError::PaymentProvider { status, message } => {
                error!(?status, %message, "payment provider failure");
                AppError::BadGateway
            }
            CheckoutError::Email { status, message } => {
                warn!(?status, %message, "email provider failure");
                AppError::BadGateway
            }
            CheckoutError::Persistence(message) => {
                error!(%message, "persistence failure");
                AppError::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, message) = match self.error {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "invalid_request", msg),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Invalid admin token".to_string(),
            ),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::PaymentRequired(msg) => {
                (StatusCode::PAYMENT_REQUIRED, "payment_not_completed", msg)
            }
            AppError::BadGateway => (
                StatusCode::BAD_GATEWAY,
                "provider_error",
                "Payment or email provider unavailable, please try again".to_string(),
            ),
            AppError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Unexpected error".to_string(),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: ErrorBody {
                    code: code.to_string(),
                    message,
                    request_id: self.request_id,
                },
            }),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::response::IntoResponse;

    fn rt() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[test]
    fn test_with_request_id() {
        let err = AppError::Internal.with_request_id("req_123");
        assert_eq!(err.request_id, "req_123");
    }

    #[test]
    fn test_bad_request_response() {
        rt().block_on(async {
            let err = AppError::BadRequest("cart is empty".to_string()).with_request_id("req_001");
            let (status, json) = body_json(err).await;

            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(json["error"]["code"], "invalid_request");
            assert_eq!(json["error"]["message"], "cart is empty");
            assert_eq!(json["error"]["request_id"], "req_001");
        });
    }

    #[test]
    fn test_unauthorized_response() {
        rt().block_on(async {
            let (status, json) = body_json(AppError::Unauthorized.with_request_id("req_002")).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(json["error"]["code"], "unauthorized");
            assert_eq!(json["error"]["message"], "Invalid admin token");
        });
    }

    #[test]
    fn test_provider_detail_is_not_exposed() {
        rt().block_on(async {
            let err = AppError::from_checkout(CheckoutError::provider(
                Some(401),
                "Invalid API Key provided: sk_live_****",
            ))
            .with_request_id("req_003");
            let (status, json) = body_json(err).await;

            assert_eq!(status, StatusCode::BAD_GATEWAY);
            assert_eq!(json["error"]["code"], "provider_error");
            assert!(!json["error"]["message"].as_str().unwrap().contains("sk_live"));
        });
    }

    #[test]
    fn test_persistence_is_internal() {
        rt().block_on(async {
            let err = AppError::from_checkout(CheckoutError::Persistence(
                "duplicate key value violates unique constraint".to_string(),
            ))
            .with_request_id("req_004");
            let (status, json) = body_json(err).await;

            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(json["error"]["message"], "Unexpected error");
        });
    }

    #[test]
    fn test_checkout_error_mapping() {
        assert!(matches!(
            AppError::from_checkout(CheckoutError::Validation("x".to_string())),
            AppError::BadRequest(_)
        ));
        assert!(matches!(
            AppError::from_checkout(CheckoutError::NotFound("voucher".to_string())),
            AppError::NotFound(msg) if msg == "voucher not found"
        ));
        assert!(matches!(
            AppError::from_checkout(CheckoutError::InvalidLink),
            AppError::Forbidden(_)
        ));
        assert!(matches!(
            AppError::from_checkout(CheckoutError::PaymentNotCompleted("unpaid".to_string())),
            AppError::PaymentRequired(_)
        ));
    }
}
