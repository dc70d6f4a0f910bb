use std::sync::Arc;

use rpcgate_core::{ArchiveCatalog, CachingValidator, Deployer, EndpointRegistry, Gateway};

use crate::config::{ConfigError, GatewayConfig, apply_deployments};
use crate::introspect::HttpIntrospector;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub validator: Arc<CachingValidator>,
    pub deployer: Arc<Deployer>,
}

impl AppState {
    pub fn new(validator: Arc<CachingValidator>, deployer: Arc<Deployer>) -> Self {
        let gateway = Gateway::new(validator.clone(), deployer.registry().clone());
        Self {
            gateway,
            validator,
            deployer,
        }
    }

    /// Builds the gateway described by `config` and applies its startup deployments.
    pub fn from_config(config: &GatewayConfig, catalog: ArchiveCatalog) -> Result<Self, ConfigError> {
        let introspector = HttpIntrospector::from_config(config)?;
        let validator = Arc::new(CachingValidator::new(
            Arc::new(introspector),
            config.validator.clone(),
        ));

        let registry = Arc::new(EndpointRegistry::new());
        let deployer = Arc::new(Deployer::new(registry, catalog));
        apply_deployments(&deployer, &config.deployments)?;

        Ok(Self::new(validator, deployer))
    }
}
