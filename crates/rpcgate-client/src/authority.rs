use serde::Deserialize;
use tracing::debug;

use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

/// Obtains access tokens from the authorization server's token endpoint.
#[derive(Clone)]
pub struct AuthorityClient {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl std::fmt::Debug for AuthorityClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorityClient")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

impl AuthorityClient {
    /// `base_url` is the authority root; tokens are requested from `{base_url}/token`.
    pub fn new(
        base_url: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            token_url: format!("{}/token", base_url.trim_end_matches('/')),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Resource owner password credentials grant.
    pub async fn password_grant(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AccessToken, ClientError> {
        self.request(&[
            ("grant_type", "password"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("username", username),
            ("password", password),
        ])
        .await
    }

    pub async fn client_credentials_grant(&self) -> Result<AccessToken, ClientError> {
        self.request(&[
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ])
        .await
    }

    async fn request(&self, form: &[(&str, &str)]) -> Result<AccessToken, ClientError> {
        let response = self.client.post(&self.token_url).form(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            debug!(%status, url = %self.token_url, "Token request rejected");
            return Err(ClientError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(response.json::<AccessToken>().await?)
    }
}
