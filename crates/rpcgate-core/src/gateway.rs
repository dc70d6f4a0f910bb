use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::errors::GatewayError;
use crate::invocation::{InvocationRequest, InvocationResponse};
use crate::registry::EndpointRegistry;
use crate::validator::TokenValidator;

/// Authenticates a call, finds its target and dispatches to it.
#[derive(Clone)]
pub struct Gateway {
    validator: Arc<dyn TokenValidator>,
    registry: Arc<EndpointRegistry>,
}

impl Gateway {
    pub fn new(validator: Arc<dyn TokenValidator>, registry: Arc<EndpointRegistry>) -> Self {
        Self {
            validator,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    #[instrument(
        skip(self, request),
        fields(request_id = %request.id, target = %request.target, method = %request.method)
    )]
    pub async fn invoke(
        &self,
        request: InvocationRequest,
    ) -> Result<InvocationResponse, GatewayError> {
        let principal = self.validator.validate(&request.bearer).await.map_err(|e| {
            info!(reason = e.reason(), "Rejected invocation");
            GatewayError::Unauthorized(e)
        })?;

        let Some(target) = self.registry.resolve(&request.target) else {
            debug!(subject = %principal.subject, "No target deployed");
            return Err(GatewayError::NotFound {
                target: request.target,
            });
        };

        debug!(subject = %principal.subject, "Dispatching invocation");
        let result = target
            .call(&request.method, request.args)
            .await
            .map_err(|e| GatewayError::from_invocation(&request.target, e))?;

        Ok(InvocationResponse {
            request_id: request.id,
            result,
        })
    }
}
