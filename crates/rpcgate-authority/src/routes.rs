use std::sync::Arc;

use axum::{
    Form, Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::config::AuthorityConfig;
use crate::dispatch::{self, IntrospectForm, TokenForm, TokenRejection};

pub fn router(config: Arc<AuthorityConfig>) -> Router {
    Router::new()
        .route("/token", post(token))
        .route("/introspect", post(introspect))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(config)
}

fn now_secs() -> u64 {
    rpcgate_core::time::now() / 1000
}

impl IntoResponse for TokenRejection {
    fn into_response(self) -> Response {
        match self {
            TokenRejection::BadRequest(reason) => {
                tracing::debug!(reason, "Rejected authority request");
                StatusCode::BAD_REQUEST.into_response()
            }
            TokenRejection::Signing(e) => {
                tracing::error!(error = %e, "Token signing failed");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

async fn token(
    State(config): State<Arc<AuthorityConfig>>,
    Form(form): Form<TokenForm>,
) -> Result<impl IntoResponse, TokenRejection> {
    let response = dispatch::issue_token(&config, &form, now_secs())?;
    tracing::info!(grant_type = ?form.grant_type, "Issued access token");
    Ok(Json(response))
}

async fn introspect(
    State(config): State<Arc<AuthorityConfig>>,
    Form(form): Form<IntrospectForm>,
) -> Result<impl IntoResponse, TokenRejection> {
    let response = dispatch::introspect(&config, &form, now_secs())?;
    Ok(Json(response))
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
