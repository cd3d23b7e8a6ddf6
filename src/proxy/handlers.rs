//! HTTP request handlers.

use axum::{
    body::{Body, Bytes},
    extract::{rejection::BytesRejection, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use super::route::{classify, GenerationRoute};
use super::server::AppState;
use super::stream::{relay_passthrough, relay_sse};
use crate::auth::UpstreamCredential;
use crate::compat::mapping::{completion_id, map_model, to_chat_completion, to_generate_request};
use crate::compat::types::ChatCompletionRequest;
use crate::config::StreamMode;
use crate::error::{Error, Result};

/// Headers sent on CORS preflight responses.
const CORS_ALLOW_METHODS: &str = "GET, POST, OPTIONS";
const CORS_ALLOW_HEADERS: &str = "*";

/// Parse the request's query string into ordered pairs.
fn query_pairs(uri: &Uri) -> Result<Vec<(String, String)>> {
    Query::<Vec<(String, String)>>::try_from_uri(uri)
        .map(|Query(pairs)| pairs)
        .map_err(|e| Error::InvalidArgument(format!("Invalid query string: {}", e)))
}

/// Resolve the client credential and turn it into the upstream credential.
fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    query: &[(String, String)],
) -> Result<UpstreamCredential> {
    let inbound = state.credentials.resolve(headers, query);
    state.gatekeeper.authorize(inbound.as_deref())
}

/// Surface body extraction failures, such as an oversized body, as an
/// enveloped error instead of axum's plain-text rejection.
fn request_body(body: std::result::Result<Bytes, BytesRejection>) -> Result<Bytes> {
    body.map_err(|rejection| {
        tracing::warn!(status = %rejection.status(), error = %rejection, "Rejected request body");
        Error::InvalidArgument(format!("Failed to read request body: {}", rejection.body_text()))
    })
}

/// Reject bodies that are not JSON before they reach the upstream.
fn ensure_json_body(body: &[u8]) -> Result<()> {
    serde_json::from_slice::<serde::de::IgnoredAny>(body)
        .map(|_| ())
        .map_err(|e| Error::InvalidArgument(format!("Request body is not valid JSON: {}", e)))
}

/// CORS handling for every route.
///
/// `OPTIONS` is answered here with 204 and never reaches a handler.
pub async fn cors(request: Request, next: Next) -> Response {
    if *request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(CORS_ALLOW_METHODS),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(CORS_ALLOW_HEADERS),
        );
        return response;
    }

    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

/// Handle `POST /v1*/models/{model}:generateContent` and
/// `:streamGenerateContent`. Every path without a dedicated route lands here.
pub async fn relay(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<Response> {
    let route = classify(&method, uri.path()).inspect_err(|e| {
        tracing::debug!(method = %method, path = %uri.path(), error = %e, "Unroutable request");
    })?;
    let query = query_pairs(&uri)?;
    let credential = authorize(&state, &headers, &query)?;
    let body = request_body(body)?;
    ensure_json_body(&body)?;

    tracing::info!(
        model = %route.model,
        operation = route.operation.as_str(),
        pool_index = ?credential.pool_index,
        "Relaying generation request"
    );
    if state.config.logging.log_bodies {
        tracing::debug!(body = %String::from_utf8_lossy(&body), "Request body");
    }

    let upstream = state
        .upstream
        .forward(&route, &query, &headers, body, &credential)
        .await?;

    if route.operation.is_streaming() {
        Ok(streaming_response(&state, &route, upstream))
    } else {
        unary_response(&state, upstream).await
    }
}

/// Buffer a unary upstream response and return it as JSON.
async fn unary_response(state: &AppState, upstream: reqwest::Response) -> Result<Response> {
    let body = upstream.bytes().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to read upstream response");
        Error::BadGateway(format!("Failed to read upstream response: {}", e))
    })?;

    if serde_json::from_slice::<serde::de::IgnoredAny>(&body).is_err() {
        tracing::error!(bytes = body.len(), "Upstream returned a non-JSON body");
        return Err(Error::BadGateway(
            "Upstream returned a non-JSON body".to_string(),
        ));
    }

    if state.config.logging.log_bodies {
        tracing::debug!(body = %String::from_utf8_lossy(&body), "Response body");
    }

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        body,
    )
        .into_response())
}

/// Relay a streaming upstream response using the configured stream contract.
fn streaming_response(
    state: &AppState,
    route: &GenerationRoute,
    upstream: reqwest::Response,
) -> Response {
    match state.upstream.stream_mode() {
        StreamMode::Sse => {
            tracing::debug!(model = %route.model, "Streaming as SSE frames");
            let body = Body::from_stream(relay_sse(
                upstream.bytes_stream(),
                state.config.logging.log_bodies,
            ));
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream")),
                    (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
                ],
                body,
            )
                .into_response()
        }
        StreamMode::Passthrough => {
            tracing::debug!(model = %route.model, "Streaming upstream bytes unchanged");
            let content_type = upstream.headers().get(header::CONTENT_TYPE).cloned();
            let content_encoding = upstream.headers().get(header::CONTENT_ENCODING).cloned();

            let mut response = Response::new(Body::from_stream(relay_passthrough(
                upstream.bytes_stream(),
            )));
            let headers = response.headers_mut();
            if let Some(value) = content_type {
                headers.insert(header::CONTENT_TYPE, value);
            }
            if let Some(value) = content_encoding {
                headers.insert(header::CONTENT_ENCODING, value);
            }
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            response
        }
    }
}

/// Handle POST /openai/v1/chat/completions
pub async fn chat_completions(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<Response> {
    let query = query_pairs(&uri)?;
    let credential = authorize(&state, &headers, &query)?;
    let body = request_body(body)?;

    let request: ChatCompletionRequest = serde_json::from_slice(&body).map_err(|e| {
        Error::InvalidArgument(format!("Invalid chat completion request: {}", e))
    })?;
    if request.stream.unwrap_or(false) {
        return Err(Error::InvalidArgument(
            "Streaming is not supported on the chat completions endpoint".to_string(),
        ));
    }
    if request.messages.is_empty() {
        return Err(Error::InvalidArgument(
            "messages must not be empty".to_string(),
        ));
    }

    let model = map_model(&request.model);
    tracing::info!(
        requested_model = %request.model,
        model = %model,
        messages = request.messages.len(),
        pool_index = ?credential.pool_index,
        "Received chat completion request"
    );

    let upstream_body = serde_json::to_value(to_generate_request(&request))
        .map_err(|e| Error::Internal(format!("Failed to build upstream request: {}", e)))?;
    if state.config.logging.log_bodies {
        tracing::debug!(body = %upstream_body, "Upstream request body");
    }

    let path = format!("/v1beta/models/{}:generateContent", model);
    let upstream = state
        .upstream
        .post_json(&path, &upstream_body, &credential)
        .await?;

    let response: serde_json::Value = upstream.json().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to parse upstream response");
        Error::BadGateway(format!("Failed to parse upstream response: {}", e))
    })?;
    if state.config.logging.log_bodies {
        tracing::debug!(body = %response, "Upstream response body");
    }

    let created = chrono::Utc::now().timestamp().max(0) as u64;
    let completion = to_chat_completion(&response, &request.model, completion_id(), created);

    Ok(Json(completion).into_response())
}

/// Handle GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "gemini-relay",
        "stream_mode": state.upstream.stream_mode().to_string(),
        "gated": state.gatekeeper.is_gated(),
        "pool_size": state.gatekeeper.pool().len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_pairs_preserve_order() {
        let uri: Uri = "/v1beta/models/m:generateContent?alt=sse&key=abc"
            .parse()
            .unwrap();
        let pairs = query_pairs(&uri).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("alt".to_string(), "sse".to_string()),
                ("key".to_string(), "abc".to_string())
            ]
        );
    }

    #[test]
    fn test_query_pairs_empty() {
        let uri: Uri = "/v1beta/models/m:generateContent".parse().unwrap();
        assert!(query_pairs(&uri).unwrap().is_empty());
    }

    #[test]
    fn test_ensure_json_body() {
        assert!(ensure_json_body(br#"{"contents":[]}"#).is_ok());
        let err = ensure_json_body(b"{not json").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(ensure_json_body(b"").is_err());
    }
}
