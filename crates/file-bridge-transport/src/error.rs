//! HTTP error mapping.

use axum::{
    Json,
    extract::multipart::MultipartError,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use file_bridge_core::BridgeError;
use thiserror::Error;

use crate::protocol::ErrorResponse;

/// Seconds a client is asked to wait when no agent is connected.
const RETRY_AFTER_SECS: &str = "5";

/// API error.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error("Session token rejected")]
    Unauthorized,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Multipart error: {0}")]
    Multipart(#[from] MultipartError),
}

impl ApiError {
    /// Status code and detail string returned to the client.
    #[must_use]
    pub fn status_and_detail(&self) -> (StatusCode, String) {
        match self {
            Self::Bridge(err) => match err {
                BridgeError::SessionMissing => (StatusCode::UNAUTHORIZED, "missing_token".into()),
                BridgeError::AgentUnavailable => {
                    (StatusCode::SERVICE_UNAVAILABLE, "agent_not_connected".into())
                }
                BridgeError::AgentTimeout(_) => {
                    (StatusCode::GATEWAY_TIMEOUT, "agent_timeout".into())
                }
                BridgeError::AgentDisconnected => {
                    (StatusCode::BAD_GATEWAY, "agent_disconnected".into())
                }
                BridgeError::PayloadTooLarge { max, .. } => (
                    StatusCode::PAYLOAD_TOO_LARGE,
                    format!("file_too_large_max_{max}"),
                ),
            },
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".into()),
            Self::NotFound(detail) => (StatusCode::NOT_FOUND, detail.clone()),
            Self::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail.clone()),
            Self::Multipart(err) => (err.status(), err.body_text()),
        }
    }
}

impl ApiError {
    /// Whether the request failed on the agent side.
    #[must_use]
    pub const fn is_agent_failure(&self) -> bool {
        matches!(self, Self::Bridge(err) if err.is_agent_failure())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = self.status_and_detail();
        if self.is_agent_failure() {
            tracing::warn!(%status, "Request failed: {self}");
        } else {
            tracing::debug!(%status, "Request rejected: {self}");
        }

        let mut response = (status, Json(ErrorResponse { detail })).into_response();
        if matches!(self, Self::Bridge(ref err) if err.is_retryable()) {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from_static(RETRY_AFTER_SECS),
            );
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_agent_failures_are_server_errors() {
        for err in [
            BridgeError::AgentUnavailable,
            BridgeError::AgentTimeout(Duration::from_secs(120)),
            BridgeError::AgentDisconnected,
        ] {
            let err = ApiError::from(err);
            assert!(err.is_agent_failure());
            assert!(err.status_and_detail().0.is_server_error());
        }
    }

    #[test]
    fn test_client_failures_are_client_errors() {
        let (status, detail) = ApiError::from(BridgeError::PayloadTooLarge {
            size: 11,
            max: 10,
        })
        .status_and_detail();
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(detail, "file_too_large_max_10");

        let err = ApiError::from(BridgeError::SessionMissing);
        assert!(!err.is_agent_failure());
        assert_eq!(err.status_and_detail().0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_unavailable_sets_retry_after() {
        let response = ApiError::from(BridgeError::AgentUnavailable).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER),
            Some(&HeaderValue::from_static("5"))
        );
    }
}
