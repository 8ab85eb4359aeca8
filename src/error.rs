use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Cannot route model '{token}': {reason}")]
    UnresolvedModel { token: String, reason: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Upstream call timed out after {0}s")]
    Timeout(u64),

    #[error("Upstream transport failure: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl GatewayError {
    pub fn unresolved(token: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnresolvedModel {
            token: token.into(),
            reason: reason.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnresolvedModel { .. } | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error type string used in the Anthropic error envelope
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::UnresolvedModel { .. } | Self::InvalidRequest(_) => "invalid_request_error",
            Self::Upstream { status: 401, .. } => "authentication_error",
            Self::Upstream { status: 429, .. } => "rate_limit_error",
            Self::Upstream { .. } | Self::Transport(_) | Self::Timeout(_) => "api_error",
            _ => "internal_error",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "type": "error",
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
            }
        });
        (self.status_code(), Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::unresolved("opus", "alias unset").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::Upstream {
                status: 429,
                body: "slow down".to_string()
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GatewayError::Timeout(300).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::Transport("reset".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_invalid_upstream_status_falls_back_to_bad_gateway() {
        let err = GatewayError::Upstream {
            status: 42,
            body: String::new(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_message_carries_offending_token() {
        let err = GatewayError::unresolved("claude-3-opus", "alias 'super' is not configured");
        assert!(err.to_string().contains("claude-3-opus"));
        assert_eq!(err.error_type(), "invalid_request_error");
    }
}
