use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::errors::InvocationError;

/// A remote-callable implementation that can be registered under a name.
#[async_trait]
pub trait RemoteTarget: Send + Sync {
    /// Names of the methods callable over the gateway.
    fn methods(&self) -> Vec<String>;

    async fn call(&self, method: &str, args: Value) -> Result<Value, InvocationError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum EndpointStatus {
    Registered,
    #[default]
    Unregistered,
}

/// Snapshot of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EndpointInfo {
    pub id: String,
    pub status: EndpointStatus,
    /// Bumped each time a new implementation is registered under `id`.
    pub generation: u64,
    pub methods: Vec<String>,
}
