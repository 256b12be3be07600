//! Streaming response coordinator.
//!
//! Bridges a provider's canonical chunk stream onto the caller's wire
//! transport (SSE or NDJSON), enforcing stream-level invariants the
//! providers cannot guarantee on their own:
//!
//! - exactly one terminal event per stream: chunks after the terminal
//!   one are dropped, and a stream that ends without one gets a
//!   synthesized failure frame
//! - mid-stream upstream errors become dialect-shaped error frames on
//!   the open connection, followed by the dialect's epilogue
//! - the active-stream gauge decrements even when the client hangs up
//!   mid-stream

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{header, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::{Stream, StreamExt};
use gateway_core::{ChatResponse, ChatStream, GatewayError, TenantId};
use gateway_dialects::{Dialect, StreamFrame, StreamTransport};
use gateway_ratelimit::{Admission, RateLimiter};
use gateway_telemetry::{Metrics, RequestMetrics};
use tracing::{debug, warn};

/// Labels and handles for one in-flight stream
pub struct StreamContext {
    /// Dialect framing the response
    pub dialect: Dialect,
    /// Model name echoed into failure frames
    pub model: String,
    /// Tenant billed for the stream
    pub tenant: TenantId,
    /// Canonical endpoint label
    pub endpoint: &'static str,
    /// Provider serving the stream
    pub provider: String,
    /// Correlation id for logs
    pub request_id: String,
    /// When the gateway accepted the request
    pub started: Instant,
    /// Metrics sink
    pub metrics: Arc<Metrics>,
    /// Usage recorder for post-stream token accounting
    pub limiter: Arc<RateLimiter>,
    /// Admission held for the life of the stream; dropping it returns
    /// the tenant's concurrency slot
    pub admission: Option<Admission>,
}

/// Decrements the active-stream gauge when the frame generator is
/// dropped, whether the stream completed or the client disconnected.
/// Holding the admission here keeps the concurrency permit checked out
/// until the last frame.
struct StreamGuard {
    metrics: Arc<Metrics>,
    _admission: Option<Admission>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.metrics.stream_ended();
    }
}

/// Turn a provider chunk stream into a complete streaming HTTP response.
pub fn respond(context: StreamContext, upstream: ChatStream) -> Response {
    context.metrics.stream_started();
    let transport = context.dialect.transport();
    let frames = frame_stream(context, upstream);

    match transport {
        StreamTransport::Sse => sse_response(frames),
        StreamTransport::NdJson => ndjson_response(frames),
    }
}

fn frame_stream(
    mut context: StreamContext,
    mut upstream: ChatStream,
) -> impl Stream<Item = StreamFrame> + Send + 'static {
    async_stream::stream! {
        let _guard = StreamGuard {
            metrics: Arc::clone(&context.metrics),
            _admission: context.admission.take(),
        };
        let mut terminated = false;

        while let Some(item) = upstream.next().await {
            match item {
                Ok(chunk) => {
                    if terminated {
                        continue;
                    }
                    let terminal = chunk.is_terminal();
                    if terminal {
                        terminated = true;
                        finish(&context, &chunk);
                    }
                    for frame in context.dialect.encode_stream_chunk(&chunk) {
                        yield frame;
                    }
                    if terminal {
                        for frame in context.dialect.stream_epilogue() {
                            yield frame;
                        }
                    }
                }
                Err(error) => {
                    if terminated {
                        debug!(
                            request_id = %context.request_id,
                            %error,
                            "upstream error after terminal chunk, dropped",
                        );
                        continue;
                    }
                    terminated = true;
                    fail(&context, &error);
                    for frame in failure_frames(&context, &error) {
                        yield frame;
                    }
                    break;
                }
            }
        }

        if !terminated {
            let error = GatewayError::upstream_decode(
                &context.provider,
                "stream ended without a terminal chunk",
            );
            fail(&context, &error);
            for frame in failure_frames(&context, &error) {
                yield frame;
            }
        }
    }
}

fn failure_frames(context: &StreamContext, error: &GatewayError) -> Vec<StreamFrame> {
    let mut frames = context.dialect.encode_stream_failure(error, &context.model);
    frames.extend(context.dialect.stream_epilogue());
    frames
}

fn finish(context: &StreamContext, chunk: &ChatResponse) {
    let usage = chunk.usage;
    context.metrics.record_request(&RequestMetrics {
        dialect: context.dialect.name(),
        endpoint: context.endpoint.to_string(),
        tenant: context.tenant.as_str().to_string(),
        provider: Some(context.provider.clone()),
        status: 200,
        duration: context.started.elapsed(),
        streaming: true,
        prompt_tokens: usage.map(|u| u.prompt_tokens),
        completion_tokens: usage.map(|u| u.completion_tokens),
    });

    if let Some(usage) = usage {
        if usage.total_tokens > 0 {
            let limiter = Arc::clone(&context.limiter);
            let tenant = context.tenant.clone();
            let endpoint = context.endpoint;
            tokio::spawn(async move {
                limiter
                    .record_usage(&tenant, endpoint, u64::from(usage.total_tokens))
                    .await;
            });
        }
    }

    debug!(
        request_id = %context.request_id,
        provider = %context.provider,
        duration_ms = context.started.elapsed().as_millis() as u64,
        "stream complete",
    );
}

fn fail(context: &StreamContext, error: &GatewayError) {
    context.metrics.record_request(&RequestMetrics {
        dialect: context.dialect.name(),
        endpoint: context.endpoint.to_string(),
        tenant: context.tenant.as_str().to_string(),
        provider: Some(context.provider.clone()),
        status: error.status_code().as_u16(),
        duration: context.started.elapsed(),
        streaming: true,
        prompt_tokens: None,
        completion_tokens: None,
    });
    context.metrics.record_error(error.error_code());

    warn!(
        request_id = %context.request_id,
        provider = %context.provider,
        error = %error,
        "stream failed",
    );
}

fn sse_response(frames: impl Stream<Item = StreamFrame> + Send + 'static) -> Response {
    let events = frames.map(|frame| {
        let mut event = Event::default().data(frame.data);
        if let Some(name) = frame.event {
            event = event.event(name);
        }
        Ok::<_, Infallible>(event)
    });

    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn ndjson_response(frames: impl Stream<Item = StreamFrame> + Send + 'static) -> Response {
    let lines = frames.map(|frame| Ok::<_, Infallible>(format!("{}\n", frame.data)));

    let mut response = Response::new(Body::from_stream(lines));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-ndjson"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use gateway_core::{FinishReason, TokenUsage};
    use gateway_ratelimit::{LimitsCache, MemoryCounterStore, StaticLimitsSource};
    use gateway_telemetry::MetricsConfig;
    use std::collections::HashMap;

    fn context(dialect: Dialect) -> StreamContext {
        let limits = StaticLimitsSource::new(HashMap::new());
        let limiter = RateLimiter::new(
            Arc::new(MemoryCounterStore::new()),
            LimitsCache::new(Arc::new(limits)),
        );

        StreamContext {
            dialect,
            model: "test-model".to_string(),
            tenant: TenantId::default_tenant(),
            endpoint: "/v1/chat/completions",
            provider: "test-provider".to_string(),
            request_id: "req-test".to_string(),
            started: Instant::now(),
            metrics: Arc::new(Metrics::new(&MetricsConfig::default()).unwrap()),
            limiter: Arc::new(limiter),
            admission: None,
        }
    }

    fn delta(index: u32, content: &str) -> ChatResponse {
        ChatResponse::chunk("chatcmpl-1", "test-model", content, index)
    }

    fn terminal(index: u32) -> ChatResponse {
        ChatResponse::terminal_chunk(
            "chatcmpl-1",
            "test-model",
            index,
            FinishReason::Stop,
            Some(TokenUsage::new(10, 5)),
        )
    }

    async fn collect(dialect: Dialect, items: Vec<Result<ChatResponse, GatewayError>>) -> Vec<StreamFrame> {
        let upstream: ChatStream = Box::pin(stream::iter(items));
        frame_stream(context(dialect), upstream).collect().await
    }

    #[tokio::test]
    async fn openai_stream_ends_with_done_sentinel() {
        let frames = collect(
            Dialect::OpenAi,
            vec![Ok(delta(0, "Hello")), Ok(terminal(1))],
        )
        .await;

        let last = frames.last().expect("frames");
        assert_eq!(last.data, "[DONE]");
    }

    #[tokio::test]
    async fn chunks_after_terminal_are_dropped() {
        let frames = collect(
            Dialect::OpenAi,
            vec![Ok(terminal(0)), Ok(delta(1, "late"))],
        )
        .await;

        assert!(frames.iter().all(|frame| !frame.data.contains("late")));
        assert_eq!(frames.last().expect("frames").data, "[DONE]");
    }

    #[tokio::test]
    async fn upstream_error_becomes_error_frame_then_done() {
        let frames = collect(
            Dialect::OpenAi,
            vec![
                Ok(delta(0, "partial")),
                Err(GatewayError::connection("test-provider", "reset by peer")),
            ],
        )
        .await;

        assert!(frames.iter().any(|frame| frame.data.contains("error")));
        assert_eq!(frames.last().expect("frames").data, "[DONE]");
    }

    #[tokio::test]
    async fn truncated_stream_synthesizes_a_failure() {
        let frames = collect(Dialect::OpenAi, vec![Ok(delta(0, "cut off"))]).await;

        assert!(frames
            .iter()
            .any(|frame| frame.data.contains("terminal chunk")));
        assert_eq!(frames.last().expect("frames").data, "[DONE]");
    }

    #[tokio::test]
    async fn anthropic_failure_frames_self_terminate() {
        let frames = collect(
            Dialect::Anthropic,
            vec![Err(GatewayError::timeout(
                "test-provider",
                std::time::Duration::from_secs(30),
            ))],
        )
        .await;

        let last = frames.last().expect("frames");
        assert_eq!(last.event, Some("message_stop"));
    }

    #[tokio::test]
    async fn ollama_frames_have_no_event_names() {
        let frames = collect(
            Dialect::Ollama,
            vec![Ok(delta(0, "hi")), Ok(terminal(1))],
        )
        .await;

        assert!(!frames.is_empty());
        assert!(frames.iter().all(|frame| frame.event.is_none()));
        let last = frames.last().expect("frames");
        assert!(last.data.contains("\"done\":true"));
    }
}
