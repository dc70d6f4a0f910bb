use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use rpcgate_core::{AuthError, DeployError, GatewayError};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Deploy(#[from] DeployError),
}

/// Metrics label for a failed invocation.
pub fn outcome(error: &GatewayError) -> &'static str {
    match error {
        GatewayError::Unauthorized(_) => "unauthorized",
        GatewayError::NotFound { .. } => "not_found",
        GatewayError::NoSuchMethod { .. } => "no_such_method",
        GatewayError::TargetFailed { .. } => "target_failed",
    }
}

fn unauthorized(reason: &AuthError) -> Response {
    let body = json!({
        "error": {
            "code": "UNAUTHORIZED",
            "reason": reason.reason(),
            "message": reason.to_string(),
        }
    });
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer")],
        Json(body),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, body) = match &self {
            ApiError::Unauthorized(reason)
            | ApiError::Gateway(GatewayError::Unauthorized(reason)) => {
                return unauthorized(reason);
            }
            ApiError::Gateway(e @ GatewayError::NotFound { target }) => (
                StatusCode::NOT_FOUND,
                json!({
                    "code": "NOT_FOUND",
                    "message": message,
                    "target": target,
                    "returnCode": e.return_code(),
                }),
            ),
            ApiError::Gateway(GatewayError::NoSuchMethod { .. }) => (
                StatusCode::BAD_REQUEST,
                json!({ "code": "NO_SUCH_METHOD", "message": message }),
            ),
            ApiError::Gateway(GatewayError::TargetFailed { .. }) => {
                tracing::warn!(error = %message, "Target failed");
                (
                    StatusCode::BAD_GATEWAY,
                    json!({ "code": "TARGET_FAILED", "message": message }),
                )
            }
            ApiError::Forbidden(_) => (
                StatusCode::FORBIDDEN,
                json!({ "code": "FORBIDDEN", "message": message }),
            ),
            ApiError::BadRequest(_) => (
                StatusCode::BAD_REQUEST,
                json!({ "code": "BAD_REQUEST", "message": message }),
            ),
            ApiError::Deploy(_) => (
                StatusCode::BAD_REQUEST,
                json!({ "code": "DEPLOY_FAILED", "message": message }),
            ),
        };

        (status, Json(json!({ "error": body }))).into_response()
    }
}
