//! Development OAuth2 authorization server.
//!
//! Issues HS256 access tokens for a fixed set of users and one client, and
//! answers token introspection for them. Meant for local runs and tests.

pub mod config;
pub mod dispatch;
pub mod routes;

pub use config::{AuthorityConfig, UserAccount};
pub use dispatch::{TokenClaims, TokenResponse};
pub use routes::router;
