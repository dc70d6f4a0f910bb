use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;
use utoipa::ToSchema;

use crate::endpoint::RemoteTarget;
use crate::errors::{DeployError, InvocationError};
use crate::registry::EndpointRegistry;

pub const STATELESS_ARCHIVE: &str = "stateless";

pub type ArchiveFactory = Arc<dyn Fn() -> Arc<dyn RemoteTarget> + Send + Sync>;

/// Named factories the deployer can build targets from.
#[derive(Clone, Default)]
pub struct ArchiveCatalog {
    archives: HashMap<String, ArchiveFactory>,
}

impl ArchiveCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin() -> Self {
        let mut catalog = Self::new();
        catalog.add(STATELESS_ARCHIVE, || {
            Arc::new(StatelessTarget) as Arc<dyn RemoteTarget>
        });
        catalog
    }

    pub fn add<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn RemoteTarget> + Send + Sync + 'static,
    {
        self.archives.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.archives.contains_key(name)
    }

    fn build(&self, name: &str) -> Result<Arc<dyn RemoteTarget>, DeployError> {
        self.archives
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| DeployError::UnknownArchive(name.to_string()))
    }
}

struct Deployment {
    archive: String,
    target: Arc<dyn RemoteTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeploymentInfo {
    pub name: String,
    pub archive: String,
}

/// Owns deployed targets and keeps the registry in step with them.
pub struct Deployer {
    registry: Arc<EndpointRegistry>,
    catalog: ArchiveCatalog,
    deployed: DashMap<String, Deployment>,
}

impl Deployer {
    pub fn new(registry: Arc<EndpointRegistry>, catalog: ArchiveCatalog) -> Self {
        Self {
            registry,
            catalog,
            deployed: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// Deploys `archive` under `name` and returns the endpoint generation.
    ///
    /// Deploying the same archive under a name that already runs it leaves the
    /// running target in place.
    pub fn deploy(&self, name: &str, archive: &str) -> Result<u64, DeployError> {
        if name.is_empty() || name.contains('/') {
            return Err(DeployError::InvalidName(name.to_string()));
        }

        match self.deployed.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().archive == archive {
                    return Ok(self.registry.register(name, &occupied.get().target));
                }
                let target = self.catalog.build(archive)?;
                let generation = self.registry.register(name, &target);
                occupied.insert(Deployment {
                    archive: archive.to_string(),
                    target,
                });
                info!(deployment = %name, archive = %archive, generation, "Redeployed with new archive");
                Ok(generation)
            }
            Entry::Vacant(vacant) => {
                let target = self.catalog.build(archive)?;
                let generation = self.registry.register(name, &target);
                vacant.insert(Deployment {
                    archive: archive.to_string(),
                    target,
                });
                info!(deployment = %name, archive = %archive, generation, "Deployed");
                Ok(generation)
            }
        }
    }

    /// Removes the deployment under `name`. Returns whether one existed.
    pub fn undeploy(&self, name: &str) -> bool {
        // Unregister while the slot is held so a concurrent deploy of the
        // same name cannot be unregistered by this call.
        match self.deployed.entry(name.to_string()) {
            Entry::Occupied(occupied) => {
                self.registry.unregister(name);
                drop(occupied.remove());
                info!(deployment = %name, "Undeployed");
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    pub fn deployments(&self) -> Vec<DeploymentInfo> {
        let mut deployments: Vec<DeploymentInfo> = self
            .deployed
            .iter()
            .map(|entry| DeploymentInfo {
                name: entry.key().clone(),
                archive: entry.value().archive.clone(),
            })
            .collect();
        deployments.sort_by(|a, b| a.name.cmp(&b.name));
        deployments
    }
}

/// Stateless target with a single remote method.
///
/// `remoteCall` answers with the number of remote methods the target exposes.
pub struct StatelessTarget;

impl StatelessTarget {
    const REMOTE_METHODS: [&'static str; 1] = ["remoteCall"];
}

#[async_trait]
impl RemoteTarget for StatelessTarget {
    fn methods(&self) -> Vec<String> {
        Self::REMOTE_METHODS.iter().map(|m| m.to_string()).collect()
    }

    async fn call(&self, method: &str, _args: Value) -> Result<Value, InvocationError> {
        match method {
            "remoteCall" => Ok(json!(Self::REMOTE_METHODS.len())),
            other => Err(InvocationError::NoSuchMethod(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointStatus;

    struct Echo;

    #[async_trait]
    impl RemoteTarget for Echo {
        fn methods(&self) -> Vec<String> {
            vec!["echo".to_string()]
        }

        async fn call(&self, _method: &str, args: Value) -> Result<Value, InvocationError> {
            Ok(args)
        }
    }

    fn deployer() -> Deployer {
        let mut catalog = ArchiveCatalog::with_builtin();
        catalog.add("echo", || Arc::new(Echo) as Arc<dyn RemoteTarget>);
        Deployer::new(Arc::new(EndpointRegistry::new()), catalog)
    }

    #[tokio::test]
    async fn stateless_target_counts_its_remote_methods() {
        let target = StatelessTarget;
        assert_eq!(target.call("remoteCall", Value::Null).await.unwrap(), json!(1));
        assert_eq!(
            target.call("other", Value::Null).await.unwrap_err(),
            InvocationError::NoSuchMethod("other".into())
        );
    }

    #[test]
    fn deploy_is_idempotent_per_archive() {
        let deployer = deployer();
        assert_eq!(deployer.deploy("server", STATELESS_ARCHIVE).unwrap(), 1);
        assert_eq!(deployer.deploy("server", STATELESS_ARCHIVE).unwrap(), 1);
        assert_eq!(deployer.deploy("server", "echo").unwrap(), 2);
        assert_eq!(
            deployer.deployments(),
            vec![DeploymentInfo {
                name: "server".into(),
                archive: "echo".into()
            }]
        );
    }

    #[test]
    fn undeploy_releases_the_target() {
        let deployer = deployer();
        deployer.deploy("server", STATELESS_ARCHIVE).unwrap();
        assert_eq!(deployer.registry().status("server"), EndpointStatus::Registered);

        assert!(deployer.undeploy("server"));
        assert!(!deployer.undeploy("server"));
        assert!(deployer.registry().resolve("server").is_none());
        assert!(deployer.deployments().is_empty());
    }

    #[test]
    fn racing_deploy_and_undeploy_keep_registry_in_step() {
        let deployer = deployer();
        for _ in 0..200 {
            std::thread::scope(|scope| {
                scope.spawn(|| deployer.undeploy("server"));
                scope.spawn(|| deployer.deploy("server", STATELESS_ARCHIVE).unwrap());
            });

            let listed = deployer.deployments().iter().any(|d| d.name == "server");
            assert_eq!(listed, deployer.registry().resolve("server").is_some());
            assert_eq!(
                deployer.registry().status("server"),
                if listed {
                    EndpointStatus::Registered
                } else {
                    EndpointStatus::Unregistered
                }
            );
        }
    }

    #[test]
    fn rejects_unknown_archive_and_bad_names() {
        let deployer = deployer();
        assert_eq!(
            deployer.deploy("server", "ear"),
            Err(DeployError::UnknownArchive("ear".into()))
        );
        assert_eq!(
            deployer.deploy("", STATELESS_ARCHIVE),
            Err(DeployError::InvalidName(String::new()))
        );
        assert!(deployer.registry().resolve("server").is_none());
    }
}
