pub mod auth;
pub mod deploy;
pub mod endpoint;
pub mod errors;
pub mod gateway;
pub mod invocation;
pub mod registry;
pub mod time;
pub mod validator;

pub use auth::{AuthError, IntrospectionResponse, Permission, Principal, Role};
pub use deploy::{ArchiveCatalog, Deployer, DeploymentInfo, STATELESS_ARCHIVE, StatelessTarget};
pub use endpoint::{EndpointInfo, EndpointStatus, RemoteTarget};
pub use errors::{DeployError, GatewayError, InvocationError, NO_TARGET_RETURN_CODE};
pub use gateway::Gateway;
pub use invocation::{InvocationRequest, InvocationResponse};
pub use registry::EndpointRegistry;
pub use validator::{CachingValidator, Introspector, TokenValidator, ValidatorSettings};
