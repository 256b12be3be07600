//! End-to-end tests driving the full router stack against a wiremock
//! upstream: each dialect surface goes in the front, one OpenAI-compatible
//! mock provider sits behind the router.

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use gateway_config::GatewayConfig;
use gateway_core::{ProviderSpec, TenantId};
use gateway_server::{create_router, AppState};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Provider spec pointing at the mock upstream. Retries are off so the
/// per-test request counts stay deterministic; the resilience tests
/// build their own spec with retries enabled.
fn upstream_spec(base_url: &str) -> ProviderSpec {
    serde_json::from_value(json!({
        "id": "mock-upstream",
        "tenant": "default",
        "kind": "openai",
        "base_url": base_url,
        "max_retries": 0,
    }))
    .expect("valid provider spec")
}

async fn state_for(specs: Vec<ProviderSpec>, tune: impl FnOnce(&mut GatewayConfig)) -> AppState {
    let mut config = GatewayConfig::default();
    config.providers = specs;
    tune(&mut config);
    AppState::builder()
        .config(config)
        .build()
        .await
        .expect("state builds")
}

/// Router backed by a single mock provider with default limits.
async fn app(server: &MockServer) -> Router {
    let state = state_for(vec![upstream_spec(&server.uri())], |_| {}).await;
    create_router(state)
}

fn post(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request builds")
}

async fn body_json(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body reads")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body is JSON")
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body reads")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("body is UTF-8")
}

fn upstream_completion() -> Value {
    json!({
        "id": "chatcmpl-42",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": "gpt-4",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Hi there"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 3, "total_tokens": 13}
    })
}

const SSE_FIXTURE: &str = concat!(
    "data: {\"id\":\"c1\",\"model\":\"gpt-4\",\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n",
    "data: {\"id\":\"c1\",\"model\":\"gpt-4\",\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":null}]}\n\n",
    "data: {\"id\":\"c1\",\"model\":\"gpt-4\",\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
    "data: [DONE]\n\n",
);

async fn mount_chat_completion(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(upstream_completion()))
        .mount(server)
        .await;
}

async fn mount_chat_stream(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SSE_FIXTURE, "text/event-stream"))
        .mount(server)
        .await;
}

async fn mount_models(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [
                {"id": "gpt-4", "object": "model", "created": 1, "owned_by": "openai"}
            ]
        })))
        .mount(server)
        .await;
}

fn openai_chat_body() -> Value {
    json!({
        "model": "gpt-4",
        "messages": [{"role": "user", "content": "Hello"}]
    })
}

mod health {
    use super::*;

    #[tokio::test]
    async fn reports_healthy_with_an_active_provider() {
        let server = MockServer::start().await;
        let response = app(&server)
            .await
            .oneshot(get("/health"))
            .await
            .expect("request succeeds");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["components"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn readiness_fails_without_providers() {
        let state = state_for(Vec::new(), |_| {}).await;
        let response = create_router(state)
            .oneshot(get("/health/ready"))
            .await
            .expect("request succeeds");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn liveness_always_answers() {
        let state = state_for(Vec::new(), |_| {}).await;
        let response = create_router(state)
            .oneshot(get("/health/live"))
            .await
            .expect("request succeeds");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "alive");
    }
}

mod openai_surface {
    use super::*;

    #[tokio::test]
    async fn chat_completion_round_trip() {
        let server = MockServer::start().await;
        mount_chat_completion(&server).await;

        let response = app(&server)
            .await
            .oneshot(post("/v1/chat/completions", &openai_chat_body()))
            .await
            .expect("request succeeds");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert!(response.headers().contains_key("x-ratelimit-limit"));
        assert!(response.headers().contains_key("x-ratelimit-remaining"));

        let body = body_json(response).await;
        assert_eq!(body["id"], "chatcmpl-42");
        assert_eq!(body["object"], "chat.completion");
        assert_eq!(body["choices"][0]["message"]["content"], "Hi there");
        assert_eq!(body["usage"]["total_tokens"], 13);
    }

    #[tokio::test]
    async fn malformed_body_is_a_bad_request() {
        let server = MockServer::start().await;
        let request = Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("not json"))
            .expect("request builds");

        let response = app(&server)
            .await
            .oneshot(request)
            .await
            .expect("request succeeds");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["type"], "invalid_request_error");
    }

    #[tokio::test]
    async fn lists_models_from_the_upstream() {
        let server = MockServer::start().await;
        mount_models(&server).await;

        let response = app(&server)
            .await
            .oneshot(get("/v1/models"))
            .await
            .expect("request succeeds");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["object"], "list");
        assert_eq!(body["data"][0]["id"], "gpt-4");
    }

    #[tokio::test]
    async fn embeddings_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(body_partial_json(json!({"model": "text-embedding-3-small"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "list",
                "model": "text-embedding-3-small",
                "data": [{"object": "embedding", "index": 0, "embedding": [0.1, 0.2]}],
                "usage": {"prompt_tokens": 4, "total_tokens": 4}
            })))
            .mount(&server)
            .await;

        let response = app(&server)
            .await
            .oneshot(post(
                "/v1/embeddings",
                &json!({"model": "text-embedding-3-small", "input": "hello"}),
            ))
            .await
            .expect("request succeeds");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"][0]["embedding"][0], 0.1);
        assert_eq!(body["usage"]["total_tokens"], 4);
    }

    #[tokio::test]
    async fn streams_sse_frames_until_done() {
        let server = MockServer::start().await;
        mount_chat_stream(&server).await;

        let mut request_body = openai_chat_body();
        request_body["stream"] = json!(true);

        let response = app(&server)
            .await
            .oneshot(post("/v1/chat/completions", &request_body))
            .await
            .expect("request succeeds");

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("text/event-stream"));

        let body = body_text(response).await;
        assert!(body.contains("Hel"));
        assert!(body.contains("chat.completion.chunk"));
        assert!(body.contains("data: [DONE]"));
    }
}

mod anthropic_surface {
    use super::*;

    #[tokio::test]
    async fn messages_round_trip() {
        let server = MockServer::start().await;
        mount_chat_completion(&server).await;

        let response = app(&server)
            .await
            .oneshot(post(
                "/v1/messages",
                &json!({
                    "model": "gpt-4",
                    "max_tokens": 64,
                    "messages": [{"role": "user", "content": "Hello"}]
                }),
            ))
            .await
            .expect("request succeeds");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["type"], "message");
        assert_eq!(body["content"][0]["text"], "Hi there");
        assert_eq!(body["stop_reason"], "end_turn");
        assert_eq!(body["usage"]["input_tokens"], 10);
    }

    #[tokio::test]
    async fn streams_named_events() {
        let server = MockServer::start().await;
        mount_chat_stream(&server).await;

        let response = app(&server)
            .await
            .oneshot(post(
                "/v1/messages",
                &json!({
                    "model": "gpt-4",
                    "max_tokens": 64,
                    "stream": true,
                    "messages": [{"role": "user", "content": "Hello"}]
                }),
            ))
            .await
            .expect("request succeeds");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("event: message_start"));
        assert!(body.contains("event: content_block_delta"));
        assert!(body.contains("event: message_stop"));
    }
}

mod gemini_surface {
    use super::*;

    #[tokio::test]
    async fn generate_content_round_trip() {
        let server = MockServer::start().await;
        mount_chat_completion(&server).await;

        let response = app(&server)
            .await
            .oneshot(post(
                "/v1beta/models/gemini-pro:generateContent",
                &json!({
                    "contents": [{"role": "user", "parts": [{"text": "Hello"}]}]
                }),
            ))
            .await
            .expect("request succeeds");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(
            body["candidates"][0]["content"]["parts"][0]["text"],
            "Hi there"
        );
        assert_eq!(body["usageMetadata"]["totalTokenCount"], 13);
    }

    #[tokio::test]
    async fn unknown_model_action_is_rejected() {
        let server = MockServer::start().await;
        let response = app(&server)
            .await
            .oneshot(post(
                "/v1beta/models/gemini-pro:frobnicate",
                &json!({"contents": []}),
            ))
            .await
            .expect("request succeeds");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn lists_models_in_gemini_shape() {
        let server = MockServer::start().await;
        mount_models(&server).await;

        let response = app(&server)
            .await
            .oneshot(get("/v1beta/models"))
            .await
            .expect("request succeeds");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["models"][0]["name"], "models/gpt-4");
    }
}

mod ollama_surface {
    use super::*;

    #[tokio::test]
    async fn chat_round_trip() {
        let server = MockServer::start().await;
        mount_chat_completion(&server).await;

        let response = app(&server)
            .await
            .oneshot(post(
                "/api/chat",
                &json!({
                    "model": "gpt-4",
                    "messages": [{"role": "user", "content": "Hello"}],
                    "stream": false
                }),
            ))
            .await
            .expect("request succeeds");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["message"]["content"], "Hi there");
        assert_eq!(body["done"], true);
    }

    #[tokio::test]
    async fn chat_streams_ndjson_by_default() {
        let server = MockServer::start().await;
        mount_chat_stream(&server).await;

        let response = app(&server)
            .await
            .oneshot(post(
                "/api/chat",
                &json!({
                    "model": "gpt-4",
                    "messages": [{"role": "user", "content": "Hello"}]
                }),
            ))
            .await
            .expect("request succeeds");

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("application/x-ndjson"));

        let body = body_text(response).await;
        let lines: Vec<Value> = body
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_str(line).expect("each line is JSON"))
            .collect();
        assert!(lines.len() >= 2);

        let content: String = lines
            .iter()
            .filter_map(|line| line["message"]["content"].as_str())
            .collect();
        assert_eq!(content, "Hello");
        assert_eq!(lines.last().expect("terminal line")["done"], true);
    }

    #[tokio::test]
    async fn tags_list_proxies_upstream_models() {
        let server = MockServer::start().await;
        mount_models(&server).await;

        let response = app(&server)
            .await
            .oneshot(get("/api/tags"))
            .await
            .expect("request succeeds");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["models"][0]["name"], "gpt-4");
    }
}

mod routing {
    use super::*;

    #[tokio::test]
    async fn provider_pool_is_scoped_to_the_tenant() {
        let server = MockServer::start().await;
        mount_chat_completion(&server).await;

        let mut spec = upstream_spec(&server.uri());
        spec.tenant = TenantId::new("acme").expect("valid tenant");
        let state = state_for(vec![spec], |_| {}).await;
        let router = create_router(state);

        let mut scoped = post("/v1/chat/completions", &openai_chat_body());
        scoped
            .headers_mut()
            .insert("x-tenant-id", "acme".parse().expect("valid header"));
        let response = router
            .clone()
            .oneshot(scoped)
            .await
            .expect("request succeeds");
        assert_eq!(response.status(), StatusCode::OK);

        // The default tenant sees no providers at all.
        let response = router
            .oneshot(post("/v1/chat/completions", &openai_chat_body()))
            .await
            .expect("request succeeds");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}

mod admission {
    use super::*;

    #[tokio::test]
    async fn second_request_in_the_window_is_rejected() {
        let server = MockServer::start().await;
        mount_chat_completion(&server).await;

        let state = state_for(vec![upstream_spec(&server.uri())], |config| {
            config.rate_limits.defaults.global.requests_per_minute = 1;
            // Bucket capacity is rpm x burst multiplier; pin it to one.
            config.rate_limits.defaults.burst_multiplier = 1.0;
        })
        .await;
        let router = create_router(state);

        let response = router
            .clone()
            .oneshot(post("/v1/chat/completions", &openai_chat_body()))
            .await
            .expect("request succeeds");
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(post("/v1/chat/completions", &openai_chat_body()))
            .await
            .expect("request succeeds");
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
        assert_eq!(
            response
                .headers()
                .get("x-ratelimit-limit")
                .and_then(|value| value.to_str().ok()),
            Some("1")
        );

        let body = body_json(response).await;
        assert_eq!(body["error"]["type"], "rate_limit_error");
    }
}

mod resilience {
    use super::*;

    #[tokio::test]
    async fn retries_a_503_and_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        mount_chat_completion(&server).await;

        let spec: ProviderSpec = serde_json::from_value(json!({
            "id": "mock-upstream",
            "tenant": "default",
            "kind": "openai",
            "base_url": server.uri(),
            "max_retries": 2,
        }))
        .expect("valid provider spec");

        let state = state_for(vec![spec], |config| {
            config.resilience.retry.base_delay = Duration::from_millis(5);
            config.resilience.retry.max_delay = Duration::from_millis(10);
        })
        .await;

        let response = create_router(state)
            .oneshot(post("/v1/chat/completions", &openai_chat_body()))
            .await
            .expect("request succeeds");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["choices"][0]["message"]["content"], "Hi there");
    }

    #[tokio::test]
    async fn non_retryable_status_passes_through_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": {"message": "boom", "type": "server_error", "code": null}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let spec: ProviderSpec = serde_json::from_value(json!({
            "id": "mock-upstream",
            "tenant": "default",
            "kind": "openai",
            "base_url": server.uri(),
            "max_retries": 3,
        }))
        .expect("valid provider spec");

        let state = state_for(vec![spec], |config| {
            config.resilience.retry.base_delay = Duration::from_millis(5);
        })
        .await;

        let response = create_router(state)
            .oneshot(post("/v1/chat/completions", &openai_chat_body()))
            .await
            .expect("request succeeds");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"]["message"], "boom");
    }
}
