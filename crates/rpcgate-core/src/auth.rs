use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Permission {
    Invoke,
    Deploy,
    Inspect,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn permissions(&self) -> HashSet<Permission> {
        match self {
            Role::Admin => [Permission::Invoke, Permission::Deploy, Permission::Inspect]
                .into_iter()
                .collect(),
            Role::User => [Permission::Invoke].into_iter().collect(),
        }
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            _ => Err(()),
        }
    }
}

/// The authenticated caller behind a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Principal {
    pub subject: String,
    pub roles: Vec<Role>,
}

impl Principal {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.roles
            .iter()
            .any(|role| role.permissions().contains(&permission))
    }

    /// Builds the principal from an active introspection response.
    ///
    /// The subject is taken from `preferred_username` when present, else `sub`.
    /// Groups map onto roles; groups with no matching role are ignored.
    pub fn from_introspection(response: &IntrospectionResponse) -> Option<Self> {
        let subject = response
            .preferred_username
            .clone()
            .or_else(|| response.sub.clone())?;

        let mut roles = Vec::new();
        for group in &response.groups {
            if let Ok(role) = group.parse::<Role>() {
                if !roles.contains(&role) {
                    roles.push(role);
                }
            }
        }

        Some(Self { subject, roles })
    }
}

/// OAuth2 token introspection response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    /// Expiry as seconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

impl IntrospectionResponse {
    pub fn inactive() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("token expired")]
    Expired,

    #[error("authorization server unreachable: {0}")]
    Unreachable(String),
}

impl AuthError {
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::Invalid(_) => "invalid",
            AuthError::Expired => "expired",
            AuthError::Unreachable(_) => "unreachable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_carries_every_permission() {
        let perms = Role::Admin.permissions();
        assert!(perms.contains(&Permission::Invoke));
        assert!(perms.contains(&Permission::Deploy));
        assert!(perms.contains(&Permission::Inspect));
        assert!(!Role::User.permissions().contains(&Permission::Deploy));
    }

    #[test]
    fn principal_prefers_username_and_skips_unknown_groups() {
        let response = IntrospectionResponse {
            active: true,
            sub: Some("1234567890".into()),
            preferred_username: Some("jdoe".into()),
            groups: vec!["user".into(), "auditors".into(), "USER".into()],
            exp: Some(1_760_991_635),
        };

        let principal = Principal::from_introspection(&response).unwrap();
        assert_eq!(principal.subject, "jdoe");
        assert_eq!(principal.roles, vec![Role::User]);
        assert!(principal.has_permission(Permission::Invoke));
        assert!(!principal.has_permission(Permission::Inspect));
    }

    #[test]
    fn principal_falls_back_to_sub() {
        let response = IntrospectionResponse {
            active: true,
            sub: Some("elytron-client".into()),
            ..Default::default()
        };
        let principal = Principal::from_introspection(&response).unwrap();
        assert_eq!(principal.subject, "elytron-client");
        assert!(principal.roles.is_empty());

        assert!(Principal::from_introspection(&IntrospectionResponse::inactive()).is_none());
    }
}
