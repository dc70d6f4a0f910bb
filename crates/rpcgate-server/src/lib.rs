//! HTTP front of the invocation gateway.
//!
//! Every call to `/invoke/{target}/{method}` carries a bearer token that is
//! introspected against the authorization server before the named target is
//! resolved in the endpoint registry. Administrative routes deploy and
//! undeploy targets and inspect the registry.

pub mod config;
pub mod error;
pub mod introspect;
pub mod routes;
pub mod state;

pub use config::{ConfigError, DeploySpec, GatewayConfig, apply_deployments};
pub use error::ApiError;
pub use introspect::HttpIntrospector;
pub use routes::{ApiDoc, build_router};
pub use state::AppState;
