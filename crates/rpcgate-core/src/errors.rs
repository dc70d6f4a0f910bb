use crate::auth::AuthError;

/// Return code reported to callers when no target is deployed under the requested name.
pub const NO_TARGET_RETURN_CODE: i64 = -1;

/// Failures raised by a target while handling a call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvocationError {
    #[error("no remote method named '{0}'")]
    NoSuchMethod(String),

    #[error("bad arguments: {0}")]
    BadArguments(String),

    #[error("{0}")]
    Failed(String),
}

/// Domain errors for the invocation gateway
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("no target deployed under '{target}'")]
    NotFound { target: String },

    #[error("target '{target}' has no remote method '{method}'")]
    NoSuchMethod { target: String, method: String },

    #[error("target '{target}' failed: {message}")]
    TargetFailed { target: String, message: String },
}

impl GatewayError {
    /// Numeric code kept for callers that still expect the sentinel contract.
    pub fn return_code(&self) -> Option<i64> {
        match self {
            GatewayError::NotFound { .. } => Some(NO_TARGET_RETURN_CODE),
            _ => None,
        }
    }

    pub(crate) fn from_invocation(target: &str, error: InvocationError) -> Self {
        match error {
            InvocationError::NoSuchMethod(method) => GatewayError::NoSuchMethod {
                target: target.to_string(),
                method,
            },
            other => GatewayError::TargetFailed {
                target: target.to_string(),
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeployError {
    #[error("unknown archive '{0}'")]
    UnknownArchive(String),

    #[error("invalid deployment name '{0}'")]
    InvalidName(String),
}
