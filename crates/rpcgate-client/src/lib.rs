//! HTTP clients for the authority and the invocation gateway.

pub mod authority;
pub mod error;
pub mod gateway;

pub use authority::{AccessToken, AuthorityClient};
pub use error::ClientError;
pub use gateway::{Deployed, GatewayClient};
