//! Outbound calls to the generative-AI API.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use bytes::Bytes;
use reqwest::Client;

use super::route::GenerationRoute;
use crate::auth::credentials::{GOOG_API_KEY_HEADER, KEY_QUERY_PARAM};
use crate::auth::UpstreamCredential;
use crate::config::{StreamMode, UpstreamConfig};
use crate::error::{Error, Result};

/// Client headers copied onto the upstream request.
pub const FORWARDED_HEADERS: [&str; 5] = [
    "content-type",
    "accept",
    "user-agent",
    "accept-language",
    "x-goog-api-client",
];

/// Thin wrapper over the shared HTTP client that knows the upstream base URL.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: Client,
    base_url: String,
    stream_mode: StreamMode,
    log_bodies: bool,
}

impl UpstreamClient {
    pub fn new(http: Client, config: &UpstreamConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            stream_mode: config.stream_mode,
            log_bodies: false,
        }
    }

    /// Log upstream error bodies at debug level.
    pub fn with_body_logging(mut self, log_bodies: bool) -> Self {
        self.log_bodies = log_bodies;
        self
    }

    pub fn stream_mode(&self) -> StreamMode {
        self.stream_mode
    }

    /// Absolute upstream URL for a path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Query string for the upstream call.
    ///
    /// The client's `key` parameter never leaves the relay. Streaming calls in
    /// SSE mode always ask the upstream for SSE output.
    pub fn upstream_query(
        &self,
        route: &GenerationRoute,
        query: &[(String, String)],
    ) -> Vec<(String, String)> {
        let force_sse = route.operation.is_streaming() && self.stream_mode == StreamMode::Sse;
        let mut pairs: Vec<(String, String)> = query
            .iter()
            .filter(|(k, _)| k != KEY_QUERY_PARAM && !(force_sse && k == "alt"))
            .cloned()
            .collect();
        if force_sse {
            pairs.push(("alt".to_string(), "sse".to_string()));
        }
        pairs
    }

    /// Allow-listed client headers for the upstream call.
    pub fn forward_headers(&self, route: &GenerationRoute, inbound: &HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for name in FORWARDED_HEADERS {
            if let Some(value) = inbound.get(name) {
                headers.insert(HeaderName::from_static(name), value.clone());
            }
        }
        // The body is only left encoded when it is passed through untouched.
        if route.operation.is_streaming() && self.stream_mode == StreamMode::Passthrough {
            if let Some(value) = inbound.get(header::ACCEPT_ENCODING) {
                headers.insert(header::ACCEPT_ENCODING, value.clone());
            }
        }
        headers
            .entry(header::CONTENT_TYPE)
            .or_insert(HeaderValue::from_static("application/json"));
        headers
    }

    /// Forward a classified generation request.
    ///
    /// Returns the upstream response only for 2xx statuses; anything else
    /// becomes [`Error::Upstream`] carrying the upstream status and body.
    pub async fn forward(
        &self,
        route: &GenerationRoute,
        query: &[(String, String)],
        inbound_headers: &HeaderMap,
        body: Bytes,
        credential: &UpstreamCredential,
    ) -> Result<reqwest::Response> {
        let url = self.url(&route.upstream_path());
        let query = self.upstream_query(route, query);
        let headers = self.forward_headers(route, inbound_headers);
        self.post(&url, &query, headers, body, credential).await
    }

    /// POST a JSON document to an upstream path.
    pub async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
        credential: &UpstreamCredential,
    ) -> Result<reqwest::Response> {
        let body = serde_json::to_vec(body)
            .map_err(|e| Error::Internal(format!("Failed to encode upstream request: {}", e)))?;
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.post(&self.url(path), &[], headers, Bytes::from(body), credential)
            .await
    }

    async fn post(
        &self,
        url: &str,
        query: &[(String, String)],
        mut headers: HeaderMap,
        body: Bytes,
        credential: &UpstreamCredential,
    ) -> Result<reqwest::Response> {
        let key = HeaderValue::from_str(credential.expose_secret())
            .map_err(|_| Error::Unauthenticated("API key contains invalid characters".to_string()))?;
        headers.insert(HeaderName::from_static(GOOG_API_KEY_HEADER), key);

        tracing::debug!(url = %url, pool_index = ?credential.pool_index, "Forwarding to upstream");

        let response = self
            .http
            .post(url)
            .query(query)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, url = %url, "Failed to reach upstream");
                Error::BadGateway(format!("Failed to reach upstream: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
            let content_encoding = response.headers().get(header::CONTENT_ENCODING).cloned();
            let body = match response.bytes().await {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(status = %status, error = %e, "Failed to read upstream error body");
                    Bytes::new()
                }
            };
            tracing::warn!(status = %status, bytes = body.len(), "Upstream returned error");
            if self.log_bodies {
                tracing::debug!(body = %String::from_utf8_lossy(&body), "Upstream error body");
            }
            return Err(Error::Upstream {
                status,
                content_type,
                content_encoding,
                body,
            });
        }

        Ok(response)
    }
}
