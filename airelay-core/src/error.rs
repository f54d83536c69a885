use http::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::model::ApiError;

/// Underlying failure carried by an [`ErrorEnvelope`].
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with the envelope.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The provider's own body reported an error; passed through untouched.
    #[error("upstream error: {} ({})", .0.message, .0.r#type)]
    Upstream(ApiError),

    #[error("http transport: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Uniform failure returned by every relay entry point.
#[derive(Debug, Error)]
#[error("{code} ({status}): {cause}")]
pub struct ErrorEnvelope {
    /// Machine-readable code identifying the failing operation.
    pub code: String,
    pub status: StatusCode,
    #[source]
    pub cause: RelayError,
}

impl ErrorEnvelope {
    /// Wrap a local failure under `code`.
    pub fn wrap(cause: impl Into<RelayError>, code: &str, status: StatusCode) -> Self {
        Self {
            code: code.to_string(),
            status,
            cause: cause.into(),
        }
    }

    /// Shorthand for the common `500` case.
    pub fn internal(cause: impl Into<RelayError>, code: &str) -> Self {
        Self::wrap(cause, code, StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Carry a provider-reported error with the provider's status code.
    pub fn upstream(error: ApiError, status: StatusCode) -> Self {
        let code = match &error.code {
            serde_json::Value::String(s) if !s.is_empty() => s.clone(),
            serde_json::Value::String(_) | serde_json::Value::Null => error.r#type.clone(),
            other => other.to_string(),
        };
        Self {
            code,
            status,
            cause: RelayError::Upstream(error),
        }
    }

    pub fn is_upstream(&self) -> bool {
        matches!(self.cause, RelayError::Upstream(_))
    }

    /// OpenAI-compatible error document for the outward response.
    pub fn to_body(&self) -> ErrorBody {
        let error = match &self.cause {
            RelayError::Upstream(api) => api.clone(),
            other => ApiError {
                message: other.to_string(),
                r#type: "airelay_error".into(),
                code: serde_json::Value::String(self.code.clone()),
                ..ApiError::default()
            },
        };
        ErrorBody { error }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ApiError,
}

pub type CoreResult<T> = std::result::Result<T, ErrorEnvelope>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wrap_defaults_to_internal_and_keeps_code() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let env = ErrorEnvelope::internal(io, "read_response_body_failed");
        assert_eq!(env.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(env.code, "read_response_body_failed");
        assert!(!env.is_upstream());
        match env.cause {
            RelayError::Io(_) => {}
            other => panic!("expected Io, got: {:?}", other),
        }
    }

    #[test]
    fn local_body_uses_relay_type() {
        let bad = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let env = ErrorEnvelope::internal(bad, "unmarshal_response_body_failed");
        let body = serde_json::to_value(env.to_body()).unwrap();
        assert_eq!(body["error"]["type"], json!("airelay_error"));
        assert_eq!(body["error"]["code"], json!("unmarshal_response_body_failed"));
    }

    #[test]
    fn upstream_body_is_verbatim() {
        let api = ApiError {
            message: "bad model".into(),
            r#type: "invalid_request_error".into(),
            param: json!("model"),
            code: json!("model_not_found"),
            ..ApiError::default()
        };
        let env = ErrorEnvelope::upstream(api, StatusCode::BAD_REQUEST);
        assert!(env.is_upstream());
        assert_eq!(env.status, StatusCode::BAD_REQUEST);
        assert_eq!(env.code, "model_not_found");
        let body = serde_json::to_value(env.to_body()).unwrap();
        assert_eq!(body["error"]["type"], json!("invalid_request_error"));
        assert_eq!(body["error"]["param"], json!("model"));
    }

    #[test]
    fn upstream_without_code_falls_back_to_type() {
        let api = ApiError {
            message: "slow down".into(),
            r#type: "rate_limit_error".into(),
            ..ApiError::default()
        };
        let env = ErrorEnvelope::upstream(api, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(env.code, "rate_limit_error");
    }

    #[test]
    fn empty_code_string_falls_back_to_type() {
        let api = ApiError {
            r#type: "server_error".into(),
            code: json!(""),
            ..ApiError::default()
        };
        let env = ErrorEnvelope::upstream(api, StatusCode::BAD_GATEWAY);
        assert_eq!(env.code, "server_error");
    }

    #[test]
    fn upstream_extra_fields_survive_rendering() {
        let raw = json!({
            "message": "filtered",
            "type": "invalid_request_error",
            "param": {"name": "prompt", "index": 0},
            "code": "content_filter",
            "innererror": {"code": "ResponsibleAIPolicyViolation"}
        });
        let api: ApiError = serde_json::from_value(raw.clone()).unwrap();
        let env = ErrorEnvelope::upstream(api, StatusCode::BAD_REQUEST);
        let body = serde_json::to_value(env.to_body()).unwrap();
        assert_eq!(body["error"], raw);
    }
}
