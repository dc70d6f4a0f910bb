//! Request handling for the development authority, kept free of HTTP types.
//!
//! Grant rules:
//! - `password`: client credentials must match and the user must exist with
//!   the given password.
//! - `client_credentials`: client credentials must match and no `username`
//!   may be sent.
//!
//! Anything else is rejected as a bad request.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rpcgate_core::IntrospectionResponse;
use serde::{Deserialize, Serialize};

use crate::config::AuthorityConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenForm {
    pub grant_type: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntrospectForm {
    pub token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub iss: String,
    pub preferred_username: String,
    #[serde(default)]
    pub groups: Vec<String>,
    pub exp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenRejection {
    #[error("bad request: {0}")]
    BadRequest(&'static str),

    #[error("signing failed: {0}")]
    Signing(String),
}

fn client_matches(config: &AuthorityConfig, id: Option<&str>, secret: Option<&str>) -> bool {
    id == Some(config.client_id.as_str()) && secret == Some(config.client_secret.as_str())
}

/// Handles a token endpoint request. `now` is in seconds since the epoch.
pub fn issue_token(
    config: &AuthorityConfig,
    form: &TokenForm,
    now: u64,
) -> Result<TokenResponse, TokenRejection> {
    if !client_matches(config, form.client_id.as_deref(), form.client_secret.as_deref()) {
        return Err(TokenRejection::BadRequest("invalid client credentials"));
    }

    let (subject, username, groups) = match form.grant_type.as_deref() {
        Some("password") => {
            let username = form
                .username
                .as_deref()
                .ok_or(TokenRejection::BadRequest("username required"))?;
            let user = config
                .user(username)
                .filter(|u| Some(u.password.as_str()) == form.password.as_deref())
                .ok_or(TokenRejection::BadRequest("invalid resource owner credentials"))?;
            (user.username.clone(), user.username.clone(), user.groups.clone())
        }
        Some("client_credentials") => {
            if form.username.is_some() {
                return Err(TokenRejection::BadRequest(
                    "username not allowed for client_credentials",
                ));
            }
            (config.client_id.clone(), config.client_id.clone(), Vec::new())
        }
        _ => return Err(TokenRejection::BadRequest("unsupported grant_type")),
    };

    let claims = TokenClaims {
        sub: subject,
        iss: config.issuer.clone(),
        preferred_username: username,
        groups,
        exp: now.saturating_add(config.token_ttl_secs),
    };

    let access_token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.signing_key.as_bytes()),
    )
    .map_err(|e| TokenRejection::Signing(e.to_string()))?;

    Ok(TokenResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: config.token_ttl_secs,
    })
}

/// Handles an introspection request. `now` is in seconds since the epoch.
pub fn introspect(
    config: &AuthorityConfig,
    form: &IntrospectForm,
    now: u64,
) -> Result<IntrospectionResponse, TokenRejection> {
    if !client_matches(config, form.client_id.as_deref(), form.client_secret.as_deref()) {
        return Err(TokenRejection::BadRequest("invalid client credentials"));
    }
    let token = form
        .token
        .as_deref()
        .ok_or(TokenRejection::BadRequest("token required"))?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.set_issuer(&[config.issuer.as_str()]);

    let claims = match decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(config.signing_key.as_bytes()),
        &validation,
    ) {
        Ok(data) => data.claims,
        Err(_) => return Ok(IntrospectionResponse::inactive()),
    };

    if claims.exp <= now {
        return Ok(IntrospectionResponse::inactive());
    }

    Ok(IntrospectionResponse {
        active: true,
        sub: Some(claims.sub),
        preferred_username: Some(claims.preferred_username),
        groups: claims.groups,
        exp: Some(claims.exp),
    })
}
