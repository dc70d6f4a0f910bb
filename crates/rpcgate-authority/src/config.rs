use std::env;
use std::net::SocketAddr;

pub const DEFAULT_CLIENT_ID: &str = "elytron-client";
pub const DEFAULT_SECRET: &str = "dont_tell_me";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is not a valid value: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    pub username: String,
    pub password: String,
    pub groups: Vec<String>,
}

/// Settings for the development authorization server.
#[derive(Clone)]
pub struct AuthorityConfig {
    pub bind: SocketAddr,
    pub issuer: String,
    pub client_id: String,
    pub client_secret: String,
    pub signing_key: String,
    pub token_ttl_secs: u64,
    pub users: Vec<UserAccount>,
}

impl std::fmt::Debug for AuthorityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorityConfig")
            .field("bind", &self.bind)
            .field("issuer", &self.issuer)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("signing_key", &"[REDACTED]")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("users", &self.users.iter().map(|u| &u.username).collect::<Vec<_>>())
            .finish()
    }
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 50831)),
            issuer: "auth.server".to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            client_secret: DEFAULT_SECRET.to_string(),
            signing_key: "authority-dev-signing-key".to_string(),
            token_ttl_secs: 3600,
            users: vec![
                UserAccount {
                    username: "alice".to_string(),
                    password: DEFAULT_SECRET.to_string(),
                    groups: vec!["admin".to_string(), "user".to_string()],
                },
                UserAccount {
                    username: "jdoe".to_string(),
                    password: DEFAULT_SECRET.to_string(),
                    groups: vec!["user".to_string()],
                },
            ],
        }
    }
}

impl AuthorityConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("AUTHORITY_BIND") {
            config.bind = value.parse().map_err(|_| ConfigError::Invalid {
                name: "AUTHORITY_BIND",
                value,
            })?;
        }
        if let Some(value) = lookup("AUTHORITY_CLIENT_ID") {
            config.client_id = value;
        }
        if let Some(value) = lookup("AUTHORITY_CLIENT_SECRET") {
            config.client_secret = value;
        }
        if let Some(value) = lookup("AUTHORITY_SIGNING_KEY") {
            config.signing_key = value;
        }
        if let Some(value) = lookup("AUTHORITY_TOKEN_TTL_SECS") {
            config.token_ttl_secs = value.parse().map_err(|_| ConfigError::Invalid {
                name: "AUTHORITY_TOKEN_TTL_SECS",
                value,
            })?;
        }

        Ok(config)
    }

    pub fn user(&self, username: &str) -> Option<&UserAccount> {
        self.users.iter().find(|u| u.username == username)
    }
}
