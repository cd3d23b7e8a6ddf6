//! Error types for gemini-relay.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for gemini-relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    BadGateway(String),

    #[error("Upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx answer from the upstream, relayed to the client as-is.
    #[error("Upstream returned {status}")]
    Upstream {
        status: StatusCode,
        content_type: Option<HeaderValue>,
        content_encoding: Option<HeaderValue>,
        body: Bytes,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status this error is reported with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Error::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Error::BadGateway(_) | Error::Transport(_) => StatusCode::BAD_GATEWAY,
            Error::Upstream { status, .. } => *status,
            Error::Config(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Canonical status name carried in the error envelope.
    pub fn status_name(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NOT_FOUND",
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::Unauthenticated(_) => "UNAUTHENTICATED",
            Error::BadGateway(_) | Error::Transport(_) => "BAD_GATEWAY",
            Error::Upstream { .. } => "UPSTREAM_ERROR",
            Error::Config(_) | Error::Internal(_) => "INTERNAL",
        }
    }

    /// The JSON error envelope for this error.
    pub fn envelope(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "code": self.status_code().as_u16(),
                "message": self.to_string(),
                "status": self.status_name(),
            }
        })
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if let Error::Upstream {
            status,
            content_type,
            content_encoding,
            body,
        } = self
        {
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = status;
            let headers = response.headers_mut();
            if let Some(content_type) = content_type {
                headers.insert(header::CONTENT_TYPE, content_type);
            }
            if let Some(content_encoding) = content_encoding {
                headers.insert(header::CONTENT_ENCODING, content_encoding);
            }
            return response;
        }

        (self.status_code(), axum::Json(self.envelope())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 65_536)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_envelope_shape() {
        let response = Error::NotFound("no route".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], 404);
        assert_eq!(json["error"]["status"], "NOT_FOUND");
        assert_eq!(json["error"]["message"], "no route");
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::NotFound(String::new()), 404, "NOT_FOUND"),
            (Error::InvalidArgument(String::new()), 400, "INVALID_ARGUMENT"),
            (Error::Unauthenticated(String::new()), 401, "UNAUTHENTICATED"),
            (Error::BadGateway(String::new()), 502, "BAD_GATEWAY"),
            (Error::Internal(String::new()), 500, "INTERNAL"),
        ];
        for (err, code, name) in cases {
            assert_eq!(err.status_code().as_u16(), code);
            assert_eq!(err.status_name(), name);
        }
    }

    #[tokio::test]
    async fn test_upstream_error_relayed_verbatim() {
        let upstream_body = r#"{"error":{"code":429,"message":"quota","status":"RESOURCE_EXHAUSTED"}}"#;
        let response = Error::Upstream {
            status: StatusCode::TOO_MANY_REQUESTS,
            content_type: Some(HeaderValue::from_static("application/json")),
            content_encoding: None,
            body: Bytes::from_static(upstream_body.as_bytes()),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        let bytes = axum::body::to_bytes(response.into_body(), 65_536)
            .await
            .unwrap();
        assert_eq!(&bytes[..], upstream_body.as_bytes());
    }

    #[tokio::test]
    async fn test_upstream_error_keeps_content_encoding() {
        let response = Error::Upstream {
            status: StatusCode::FORBIDDEN,
            content_type: Some(HeaderValue::from_static("application/json")),
            content_encoding: Some(HeaderValue::from_static("gzip")),
            body: Bytes::from_static(&[0x1f, 0x8b, 0x08]),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response.headers().get(header::CONTENT_ENCODING).unwrap(),
            "gzip"
        );
        let bytes = axum::body::to_bytes(response.into_body(), 65_536)
            .await
            .unwrap();
        assert_eq!(&bytes[..], &[0x1f_u8, 0x8b, 0x08][..]);
    }
}
