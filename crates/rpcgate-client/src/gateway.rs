use reqwest::{RequestBuilder, Response, Url};
use rpcgate_core::{EndpointInfo, InvocationResponse, NO_TARGET_RETURN_CODE};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Deployed {
    pub name: String,
    pub archive: String,
    pub generation: u64,
}

#[derive(Deserialize)]
struct Undeployed {
    undeployed: bool,
}

#[derive(Deserialize)]
struct Revoked {
    revoked: bool,
}

/// Calls the invocation gateway on behalf of one bearer token.
#[derive(Clone)]
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl GatewayClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    /// Joins `segments` onto the base URL, percent-encoding each one so that
    /// names containing `/`, `?` or `#` stay inside their own segment.
    fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn parse<T: DeserializeOwned>(
        response: Response,
        target: Option<&str>,
    ) -> Result<T, ClientError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            Err(ClientError::from_response(response, target).await)
        }
    }

    /// Invokes `method` on `target` and returns the call's JSON result.
    pub async fn invoke(&self, target: &str, method: &str, args: Value) -> Result<Value, ClientError> {
        let url = self.url(&["invoke", target, method])?;
        debug!(%target, %method, "Invoking remote method");
        let response = self
            .authorized(self.client.post(url))
            .json(&json!({ "args": args }))
            .send()
            .await?;
        let response: InvocationResponse = Self::parse(response, Some(target)).await?;
        Ok(response.result)
    }

    /// Calls `remoteCall` on `target`, answering `-1` when nothing is deployed there.
    ///
    /// Only a missing target maps to `-1`; authentication and other failures
    /// stay errors.
    pub async fn remote_call_or_sentinel(&self, target: &str) -> Result<i64, ClientError> {
        match self.invoke(target, "remoteCall", json!([])).await {
            Ok(value) => value.as_i64().ok_or_else(|| ClientError::Remote {
                status: 200,
                code: "UNEXPECTED_RESULT".to_string(),
                message: format!("expected an integer result, got {value}"),
            }),
            Err(ClientError::NotFound { .. }) => Ok(NO_TARGET_RETURN_CODE),
            Err(e) => Err(e),
        }
    }

    pub async fn deploy(&self, name: &str, archive: &str) -> Result<Deployed, ClientError> {
        let url = self.url(&["admin", "deployments", name])?;
        let response = self
            .authorized(self.client.put(url))
            .json(&json!({ "archive": archive }))
            .send()
            .await?;
        Self::parse(response, None).await
    }

    /// Returns whether anything was deployed under `name`.
    pub async fn undeploy(&self, name: &str) -> Result<bool, ClientError> {
        let url = self.url(&["admin", "deployments", name])?;
        let response = self.authorized(self.client.delete(url)).send().await?;
        let body: Undeployed = Self::parse(response, None).await?;
        Ok(body.undeployed)
    }

    pub async fn endpoints(&self) -> Result<Vec<EndpointInfo>, ClientError> {
        let url = self.url(&["admin", "endpoints"])?;
        let response = self.authorized(self.client.get(url)).send().await?;
        Self::parse(response, None).await
    }

    /// Drops the gateway's cached validation of `token`.
    pub async fn revoke(&self, token: &str) -> Result<bool, ClientError> {
        let url = self.url(&["admin", "tokens", "revoke"])?;
        let response = self
            .authorized(self.client.post(url))
            .json(&json!({ "token": token }))
            .send()
            .await?;
        let body: Revoked = Self::parse(response, None).await?;
        Ok(body.revoked)
    }
}
