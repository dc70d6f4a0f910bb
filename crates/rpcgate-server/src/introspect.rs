use std::time::Duration;

use async_trait::async_trait;
use rpcgate_core::{AuthError, IntrospectionResponse, Introspector};
use tracing::{debug, warn};

use crate::config::{ConfigError, GatewayConfig};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Introspects tokens against the authority's HTTP endpoint.
///
/// Timeouts, connection failures and 5xx answers are reported as
/// [`AuthError::Unreachable`]; a 400/401/403 means the authority refused the
/// request itself and is reported as [`AuthError::Invalid`].
pub struct HttpIntrospector {
    client: reqwest::Client,
    url: String,
    client_id: String,
    client_secret: Option<String>,
}

impl HttpIntrospector {
    pub fn new(
        url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(CONNECT_TIMEOUT))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            client_id: client_id.into(),
            client_secret,
        })
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        Self::new(
            config.introspection_url.clone(),
            config.client_id.clone(),
            config.client_secret.clone(),
            config.introspection_timeout,
        )
    }
}

fn record(outcome: &'static str) {
    metrics::counter!("rpcgate_introspections_total", "outcome" => outcome).increment(1);
}

#[async_trait]
impl Introspector for HttpIntrospector {
    async fn introspect(&self, token: &str) -> Result<IntrospectionResponse, AuthError> {
        let mut form = vec![
            ("token", token),
            ("token_type_hint", "access_token"),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let response = self
            .client
            .post(&self.url)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                record("unreachable");
                warn!(url = %self.url, error = %e, "Introspection request failed");
                AuthError::Unreachable(e.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            let body = response.json::<IntrospectionResponse>().await.map_err(|e| {
                record("malformed");
                AuthError::Unreachable(format!("malformed introspection response: {e}"))
            })?;
            record(if body.active { "active" } else { "inactive" });
            Ok(body)
        } else if matches!(status.as_u16(), 400 | 401 | 403) {
            record("rejected");
            debug!(%status, "Authority rejected introspection request");
            Err(AuthError::Invalid(format!(
                "authorization server rejected introspection ({status})"
            )))
        } else {
            record("unreachable");
            Err(AuthError::Unreachable(format!(
                "authorization server answered {status}"
            )))
        }
    }
}
