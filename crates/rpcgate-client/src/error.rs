use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("unauthorized ({reason})")]
    Unauthorized { reason: String },

    #[error("no target deployed under '{target}'")]
    NotFound { target: String },

    #[error("gateway answered {status} {code}: {message}")]
    Remote {
        status: u16,
        code: String,
        message: String,
    },

    #[error("authority rejected the token request ({status})")]
    Rejected { status: u16 },

    #[error("invalid gateway url: {0}")]
    InvalidUrl(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
    reason: Option<String>,
    target: Option<String>,
}

impl ClientError {
    /// Turns a non-success gateway response into the matching error.
    pub(crate) async fn from_response(response: reqwest::Response, target: Option<&str>) -> Self {
        let status = response.status().as_u16();
        let body = response
            .json::<ErrorEnvelope>()
            .await
            .unwrap_or_default()
            .error;

        match (status, body.code.as_str()) {
            (401, _) => ClientError::Unauthorized {
                reason: body.reason.unwrap_or_else(|| "invalid".to_string()),
            },
            (404, "NOT_FOUND") => ClientError::NotFound {
                target: body
                    .target
                    .or_else(|| target.map(str::to_string))
                    .unwrap_or_default(),
            },
            _ => ClientError::Remote {
                status,
                code: body.code,
                message: body.message,
            },
        }
    }
}
