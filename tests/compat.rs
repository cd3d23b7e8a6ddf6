//! Integration tests for the OpenAI-compatible chat completions endpoint.

use axum::body::Body;
use http::{Request, StatusCode};
use tower::ServiceExt;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gemini_relay::config::{ApiKey, Config};
use gemini_relay::proxy::{create_router, AppState};

const CHAT_PATH: &str = "/openai/v1/chat/completions";

fn app(base_url: &str) -> axum::Router {
    let mut config = Config::default();
    config.upstream.base_url = base_url.to_string();
    create_router(AppState::with_client(config, reqwest::Client::new()))
}

fn chat_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(CHAT_PATH)
        .header("content-type", "application/json")
        .header("authorization", "Bearer client-key")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn parse_body(response: axum::response::Response) -> (StatusCode, serde_json::Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
        .await
        .expect("read body");
    let json = serde_json::from_slice(&bytes).unwrap_or_default();
    (status, json)
}

#[tokio::test]
async fn test_gpt4_request_maps_to_generate_content() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-pro:generateContent"))
        .and(header("x-goog-api-key", "client-key"))
        .and(body_json(serde_json::json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hello!"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2, "totalTokenCount": 5}
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let response = app(&upstream.uri())
        .oneshot(chat_request(serde_json::json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .await
        .unwrap();

    let (status, json) = parse_body(response).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["id"].as_str().unwrap().starts_with("chatcmpl-"));
    assert_eq!(json["object"], "chat.completion");
    assert!(json["created"].as_u64().unwrap() > 0);
    assert_eq!(json["model"], "gpt-4");
    assert_eq!(json["choices"][0]["index"], 0);
    assert_eq!(json["choices"][0]["message"]["role"], "assistant");
    assert_eq!(json["choices"][0]["message"]["content"], "Hello!");
    assert_eq!(json["choices"][0]["finish_reason"], "stop");
    assert_eq!(json["usage"]["total_tokens"], 5);
}

#[tokio::test]
async fn test_unknown_model_uses_default() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&upstream)
        .await;

    let response = app(&upstream.uri())
        .oneshot(chat_request(serde_json::json!({
            "model": "some-other-model",
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .await
        .unwrap();

    let (status, json) = parse_body(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["model"], "some-other-model");
    assert_eq!(json["choices"][0]["message"]["content"], "");
}

#[tokio::test]
async fn test_streaming_request_is_rejected() {
    let upstream = MockServer::start().await;
    let response = app(&upstream.uri())
        .oneshot(chat_request(serde_json::json!({
            "model": "gpt-4",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .await
        .unwrap();

    let (status, json) = parse_body(response).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["status"], "INVALID_ARGUMENT");
    assert!(upstream.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_request_is_invalid_argument() {
    let upstream = MockServer::start().await;
    let response = app(&upstream.uri())
        .oneshot(chat_request(serde_json::json!({"messages": "nope"})))
        .await
        .unwrap();

    let (status, json) = parse_body(response).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], 400);
}

#[tokio::test]
async fn test_gated_compat_request_needs_gate_key() {
    let upstream = MockServer::start().await;
    let mut config = Config::default();
    config.upstream.base_url = upstream.uri();
    config.auth.gate_key = Some(ApiKey::from("gate-secret"));
    config.auth.keys = vec![ApiKey::from("pool-a")];
    let app = create_router(AppState::with_client(config, reqwest::Client::new()));

    let response = app
        .oneshot(chat_request(serde_json::json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .await
        .unwrap();

    let (status, json) = parse_body(response).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["status"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_upstream_failure_is_relayed() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-pro:generateContent"))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "error": {"code": 403, "message": "API key not valid", "status": "PERMISSION_DENIED"}
        })))
        .mount(&upstream)
        .await;

    let response = app(&upstream.uri())
        .oneshot(chat_request(serde_json::json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .await
        .unwrap();

    let (status, json) = parse_body(response).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["error"]["status"], "PERMISSION_DENIED");
}

#[tokio::test]
async fn test_get_on_chat_path_is_not_found() {
    let upstream = MockServer::start().await;
    let response = app(&upstream.uri())
        .oneshot(
            Request::builder()
                .uri(CHAT_PATH)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let (status, json) = parse_body(response).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["status"], "NOT_FOUND");
}
