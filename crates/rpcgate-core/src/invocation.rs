use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

/// One call through the gateway. Lives for the duration of that call.
#[derive(Clone)]
pub struct InvocationRequest {
    pub id: Uuid,
    pub target: String,
    pub method: String,
    pub bearer: String,
    pub args: Value,
}

impl InvocationRequest {
    pub fn new(
        target: impl Into<String>,
        method: impl Into<String>,
        bearer: impl Into<String>,
        args: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            target: target.into(),
            method: method.into(),
            bearer: bearer.into(),
            args,
        }
    }
}

impl std::fmt::Debug for InvocationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationRequest")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("method", &self.method)
            .field("bearer", &"[REDACTED]")
            .field("args", &self.args)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResponse {
    #[schema(value_type = String)]
    pub request_id: Uuid,
    #[schema(value_type = Object)]
    pub result: Value,
}
