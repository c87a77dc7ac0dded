//! Error types for the bridge.
//!
//! Every failure maps onto one of the Anthropic error kinds and is rendered
//! to the client as `{"type":"error","error":{"type":..,"message":..}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::translate::anthropic_types::ErrorResponse;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{message}")]
    Authentication { message: String },

    #[error("{message}")]
    InvalidRequest { message: String },

    #[error("{message}")]
    NotFound { message: String },

    #[error("Upstream returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Translation error: {message}")]
    Translation { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication {
            message: msg.into(),
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound {
            message: msg.into(),
        }
    }

    pub fn upstream(status: u16, msg: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: msg.into(),
        }
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        Self::Translation {
            message: msg.into(),
        }
    }

    /// Anthropic error kind reported in the payload's `error.type`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication { .. } => "authentication_error",
            Self::InvalidRequest { .. } => "invalid_request_error",
            Self::NotFound { .. } => "not_found_error",
            Self::Config { .. }
            | Self::Upstream { .. }
            | Self::Translation { .. }
            | Self::Http(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Toml(_) => "api_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Authentication { .. } => StatusCode::UNAUTHORIZED,
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Upstream { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            Self::Translation { .. } | Self::Http(_) | Self::Json(_) => StatusCode::BAD_GATEWAY,
            Self::Config { .. } | Self::Io(_) | Self::Toml(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse::new(self.kind(), self.to_string())
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_error_response())).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_error_keeps_status_and_text() {
        let err = ProxyError::upstream(429, "Rate limit reached");
        assert_eq!(err.kind(), "api_error");
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            err.to_error_response().error.message,
            "Upstream returned status 429: Rate limit reached"
        );
    }

    #[test]
    fn test_upstream_non_error_status_becomes_bad_gateway() {
        let err = ProxyError::upstream(302, "moved");
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_kinds() {
        assert_eq!(ProxyError::authentication("x").kind(), "authentication_error");
        assert_eq!(ProxyError::invalid_request("x").kind(), "invalid_request_error");
        assert_eq!(ProxyError::not_found("x").kind(), "not_found_error");
        assert_eq!(ProxyError::translation("x").kind(), "api_error");
        assert_eq!(ProxyError::invalid_request("x").status(), StatusCode::BAD_REQUEST);
    }
}
