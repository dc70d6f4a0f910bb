use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, Request, header},
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
};
use rpcgate_core::{
    AuthError, DeploymentInfo, EndpointInfo, EndpointStatus, InvocationRequest,
    InvocationResponse, Permission, Principal, STATELESS_ARCHIVE,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::error::{ApiError, outcome};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        invoke,
        list_endpoints,
        list_deployments,
        deploy,
        undeploy,
        revoke_token,
        health_check,
    ),
    components(
        schemas(
            InvokeBody,
            InvocationResponse,
            EndpointInfo,
            EndpointStatus,
            DeploymentInfo,
            DeployRequest,
            DeployResponse,
            UndeployResponse,
            RevokeRequest,
            RevokeResponse,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            )
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/endpoints", get(list_endpoints))
        .route("/deployments", get(list_deployments))
        .route("/deployments/:name", put(deploy).delete(undeploy))
        .route("/tokens/revoke", post(revoke_token))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(health_check))
        .route("/invoke/:target/:method", post(invoke))
        .nest("/admin", admin)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The credentials of an `Authorization: Bearer` header. The scheme is
/// matched case-insensitively.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim_start().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Decodes an optional JSON body. An empty body means the defaults; anything
/// else must parse.
fn json_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
}

fn require(principal: &Principal, permission: Permission) -> Result<(), ApiError> {
    if principal.has_permission(permission) {
        Ok(())
    } else {
        Err(ApiError::Forbidden("insufficient permissions"))
    }
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct InvokeBody {
    #[serde(default)]
    #[schema(value_type = Object)]
    pub args: Value,
}

#[utoipa::path(
    post,
    path = "/invoke/{target}/{method}",
    request_body = InvokeBody,
    responses(
        (status = 200, description = "Invocation result", body = InvocationResponse),
        (status = 401, description = "Missing, invalid or expired bearer token"),
        (status = 404, description = "No target deployed under this name; carries returnCode -1"),
        (status = 400, description = "Malformed body or no such remote method"),
        (status = 502, description = "Target failed")
    ),
    params(
        ("target" = String, Path, description = "Deployment name"),
        ("method" = String, Path, description = "Remote method name")
    ),
    security(("bearer" = []))
)]
async fn invoke(
    State(state): State<AppState>,
    Path((target, method)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<InvocationResponse>, ApiError> {
    let bearer = bearer_token(&headers).unwrap_or_default();
    let InvokeBody { args } = json_body(&body)?;
    let request = InvocationRequest::new(target, method, bearer, args);

    match state.gateway.invoke(request).await {
        Ok(response) => {
            metrics::counter!("rpcgate_invocations_total", "outcome" => "ok").increment(1);
            Ok(Json(response))
        }
        Err(e) => {
            metrics::counter!("rpcgate_invocations_total", "outcome" => outcome(&e)).increment(1);
            Err(e.into())
        }
    }
}

#[utoipa::path(
    get,
    path = "/admin/endpoints",
    responses(
        (status = 200, description = "Registry entries", body = Vec<EndpointInfo>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Insufficient permissions")
    ),
    security(("bearer" = []))
)]
async fn list_endpoints(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<EndpointInfo>>, ApiError> {
    require(&principal, Permission::Inspect)?;
    Ok(Json(state.deployer.registry().list()))
}

#[utoipa::path(
    get,
    path = "/admin/deployments",
    responses(
        (status = 200, description = "Current deployments", body = Vec<DeploymentInfo>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Insufficient permissions")
    ),
    security(("bearer" = []))
)]
async fn list_deployments(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<DeploymentInfo>>, ApiError> {
    require(&principal, Permission::Inspect)?;
    Ok(Json(state.deployer.deployments()))
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct DeployRequest {
    /// Catalog archive to deploy; defaults to the stateless archive.
    #[schema(example = "stateless")]
    pub archive: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeployResponse {
    pub name: String,
    pub archive: String,
    pub generation: u64,
}

#[utoipa::path(
    put,
    path = "/admin/deployments/{name}",
    request_body = DeployRequest,
    responses(
        (status = 200, description = "Deployed", body = DeployResponse),
        (status = 400, description = "Malformed body, unknown archive or bad name"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Insufficient permissions")
    ),
    params(("name" = String, Path, description = "Deployment name")),
    security(("bearer" = []))
)]
async fn deploy(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<DeployResponse>, ApiError> {
    require(&principal, Permission::Deploy)?;
    let DeployRequest { archive } = json_body(&body)?;
    let archive = archive.unwrap_or_else(|| STATELESS_ARCHIVE.to_string());

    let generation = state.deployer.deploy(&name, &archive)?;
    tracing::info!(subject = %principal.subject, deployment = %name, %archive, "Deploy requested");
    Ok(Json(DeployResponse {
        name,
        archive,
        generation,
    }))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UndeployResponse {
    pub name: String,
    pub undeployed: bool,
}

#[utoipa::path(
    delete,
    path = "/admin/deployments/{name}",
    responses(
        (status = 200, description = "Undeployed (idempotent)", body = UndeployResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Insufficient permissions")
    ),
    params(("name" = String, Path, description = "Deployment name")),
    security(("bearer" = []))
)]
async fn undeploy(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
) -> Result<Json<UndeployResponse>, ApiError> {
    require(&principal, Permission::Deploy)?;
    let undeployed = state.deployer.undeploy(&name);
    tracing::info!(subject = %principal.subject, deployment = %name, undeployed, "Undeploy requested");
    Ok(Json(UndeployResponse { name, undeployed }))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RevokeRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RevokeResponse {
    pub revoked: bool,
}

#[utoipa::path(
    post,
    path = "/admin/tokens/revoke",
    request_body = RevokeRequest,
    responses(
        (status = 200, description = "Cached validation dropped", body = RevokeResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Insufficient permissions")
    ),
    security(("bearer" = []))
)]
async fn revoke_token(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<RevokeRequest>,
) -> Result<Json<RevokeResponse>, ApiError> {
    require(&principal, Permission::Deploy)?;
    let revoked = state.validator.revoke(&payload.token);
    tracing::info!(subject = %principal.subject, revoked, "Token revocation requested");
    Ok(Json(RevokeResponse { revoked }))
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "OK"))
)]
async fn health_check() -> &'static str {
    "OK"
}

async fn auth_middleware<B>(
    State(state): State<AppState>,
    mut req: Request<B>,
    next: Next<B>,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers())
        .ok_or_else(|| AuthError::Invalid("missing bearer token".to_string()))?
        .to_string();

    let principal = state.validator.validate(&token).await?;
    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}
