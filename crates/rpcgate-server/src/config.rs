//! Gateway configuration
//!
//! Loaded once from the environment at startup and applied to explicit
//! handles. Applying the same configuration twice leaves the gateway unchanged.

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use rpcgate_core::{DeployError, Deployer, STATELESS_ARCHIVE, ValidatorSettings};

pub const DEFAULT_INTROSPECTION_URL: &str = "http://localhost:50831/introspect";
pub const DEFAULT_CLIENT_ID: &str = "elytron-client";
pub const DEFAULT_INTROSPECTION_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is not a valid value: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("failed to apply deployment: {0}")]
    Deploy(#[from] DeployError),
}

/// A deployment requested at startup, written `name` or `name=archive`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploySpec {
    pub name: String,
    pub archive: String,
}

impl FromStr for DeploySpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, archive) = match s.split_once('=') {
            Some((name, archive)) => (name.trim(), archive.trim()),
            None => (s, STATELESS_ARCHIVE),
        };
        if name.is_empty() || archive.is_empty() {
            return Err(s.to_string());
        }
        Ok(Self {
            name: name.to_string(),
            archive: archive.to_string(),
        })
    }
}

#[derive(Clone)]
pub struct GatewayConfig {
    pub bind: SocketAddr,
    pub introspection_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub introspection_timeout: Duration,
    pub validator: ValidatorSettings,
    pub purge_interval: Duration,
    pub deployments: Vec<DeploySpec>,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("bind", &self.bind)
            .field("introspection_url", &self.introspection_url)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("introspection_timeout", &self.introspection_timeout)
            .field("validator", &self.validator)
            .field("purge_interval", &self.purge_interval)
            .field("deployments", &self.deployments)
            .finish()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8180)),
            introspection_url: DEFAULT_INTROSPECTION_URL.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            client_secret: None,
            introspection_timeout: DEFAULT_INTROSPECTION_TIMEOUT,
            validator: ValidatorSettings::default(),
            purge_interval: DEFAULT_PURGE_INTERVAL,
            deployments: Vec::new(),
        }
    }
}

fn parse<T: FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value })
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("RPCGATE_BIND") {
            config.bind = parse("RPCGATE_BIND", v)?;
        }
        if let Some(v) = lookup("RPCGATE_INTROSPECTION_URL") {
            config.introspection_url = v;
        }
        if let Some(v) = lookup("RPCGATE_CLIENT_ID") {
            config.client_id = v;
        }
        config.client_secret = lookup("RPCGATE_CLIENT_SECRET").filter(|s| !s.is_empty());

        if let Some(v) = lookup("RPCGATE_INTROSPECTION_TIMEOUT_MS") {
            config.introspection_timeout =
                Duration::from_millis(parse("RPCGATE_INTROSPECTION_TIMEOUT_MS", v)?);
        }
        if let Some(v) = lookup("RPCGATE_TOKEN_CACHE_MAX_TTL_SECS") {
            config.validator.max_cache_ttl =
                Duration::from_secs(parse("RPCGATE_TOKEN_CACHE_MAX_TTL_SECS", v)?);
        }
        if let Some(v) = lookup("RPCGATE_BACKOFF_INITIAL_MS") {
            config.validator.backoff_initial =
                Duration::from_millis(parse("RPCGATE_BACKOFF_INITIAL_MS", v)?);
        }
        if let Some(v) = lookup("RPCGATE_BACKOFF_MAX_MS") {
            config.validator.backoff_max =
                Duration::from_millis(parse("RPCGATE_BACKOFF_MAX_MS", v)?);
        }
        if let Some(v) = lookup("RPCGATE_CACHE_PURGE_SECS") {
            config.purge_interval = Duration::from_secs(parse("RPCGATE_CACHE_PURGE_SECS", v)?);
        }
        if let Some(v) = lookup("RPCGATE_DEPLOY") {
            config.deployments = v
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| {
                    s.parse::<DeploySpec>().map_err(|bad| ConfigError::Invalid {
                        name: "RPCGATE_DEPLOY",
                        value: bad,
                    })
                })
                .collect::<Result<Vec<_>, ConfigError>>()?;
        }

        Ok(config)
    }
}

/// Deploys every requested archive. Safe to call again with the same specs.
pub fn apply_deployments(deployer: &Deployer, specs: &[DeploySpec]) -> Result<(), ConfigError> {
    for spec in specs {
        let generation = deployer.deploy(&spec.name, &spec.archive)?;
        tracing::info!(deployment = %spec.name, archive = %spec.archive, generation, "Applied startup deployment");
    }
    Ok(())
}
