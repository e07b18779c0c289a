// src/adapter.rs
// Adapter (§4.H): the orchestrator. Exactly one call site, `execute`, ties
// together the token cache, request translator, frame decoder, and stream
// assembler, with 401-retry and error classification.
//
// Grounded on the teacher's `llm/router/mod.rs` `route_with_fallback` for
// the retry-once shape (attempt, classify failure, attempt again) and
// `advisory/providers/opus.rs` for the streaming-body-to-SSE pump.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cancellation::CancellationToken;
use crate::client_types::ChatRequest;
use crate::config::ProviderConfig;
use crate::error::{CoreError, CoreResult};
use crate::frame::FrameDecoder;
use crate::identity::{IdentityGenerator, IdentityHeaders};
use crate::sink::ResponseSink;
use crate::stream::StreamAssembler;
use crate::token_cache::TokenCache;
use crate::tokens::estimate_request_tokens;
use crate::transport::{GenerateRequest, UpstreamTransport};
use crate::translate::translate;

/// Everything the adapter needs about one inbound request beyond the
/// Claude-shaped body itself (§6 "Inbound").
pub struct RequestContext {
    pub chat_request: ChatRequest,
    pub conversation_id_header: Option<String>,
    pub agent_continuation_id_header: Option<String>,
    pub forwarded_for: Option<String>,
    pub real_ip: Option<String>,
    pub remote_addr: String,
    pub user_agent: String,
    pub cancellation: CancellationToken,
}

impl RequestContext {
    fn identity_headers(&self) -> IdentityHeaders<'_> {
        IdentityHeaders {
            conversation_id: self.conversation_id_header.as_deref(),
            agent_continuation_id: self.agent_continuation_id_header.as_deref(),
            forwarded_for: self.forwarded_for.as_deref(),
            real_ip: self.real_ip.as_deref(),
            remote_addr: &self.remote_addr,
            user_agent: &self.user_agent,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ExecuteOutcome {
    /// The response (streamed or aggregated) was delivered in full.
    Completed,
    /// The client disconnected mid-stream; not an error (§4.H step 7,
    /// §5 "Cancellation").
    Cancelled,
}

pub struct Adapter {
    config: ProviderConfig,
    token_cache: TokenCache,
    identity: IdentityGenerator,
    transport: Arc<dyn UpstreamTransport>,
    strict_sse: bool,
}

impl Adapter {
    pub fn new(config: ProviderConfig, transport: Arc<dyn UpstreamTransport>) -> Self {
        Self {
            token_cache: TokenCache::new(config.clone(), transport.clone()),
            config,
            identity: IdentityGenerator::new(),
            transport,
            strict_sse: false,
        }
    }

    pub async fn execute(
        &self,
        ctx: &RequestContext,
        sink: &mut dyn ResponseSink,
    ) -> CoreResult<ExecuteOutcome> {
        let access_token = self
            .token_cache
            .get()
            .await
            .map_err(|_| CoreError::auth_failure("failed to get access token"))?;

        let identity = self.identity.generate(&ctx.identity_headers());
        let translated = translate(
            &ctx.chat_request,
            &identity,
            &self.config.model_exact_map,
            &self.config.model_rules,
        )?;

        let url = self.config.generate_assistant_response_url();
        let streaming = ctx.chat_request.stream;
        let input_tokens = estimate_request_tokens(&ctx.chat_request);

        let response = self
            .send_with_retry(&url, &access_token, translated.body.clone(), streaming)
            .await?;

        if response.status >= 400 {
            let status = response.status;
            let body = response.collect_body().await.unwrap_or_default();
            let text = String::from_utf8_lossy(&body).to_string();
            error!(status, "upstream returned error status");
            return Err(CoreError::upstream_status(status, text));
        }

        let message_id = format!("msg_{}", Uuid::new_v4().simple());
        let mut assembler = StreamAssembler::new(message_id, translated.mapped_model_id, self.strict_sse);

        if streaming {
            self.run_streaming(response, &mut assembler, sink, ctx).await
        } else {
            self.run_aggregating(response, &mut assembler, sink, input_tokens).await
        }
    }

    async fn send_with_retry(
        &self,
        url: &str,
        access_token: &str,
        body: Vec<u8>,
        streaming: bool,
    ) -> CoreResult<crate::transport::UpstreamResponse> {
        let first = self
            .transport
            .generate(GenerateRequest {
                url: url.to_string(),
                access_token: access_token.to_string(),
                body: body.clone(),
                streaming,
            })
            .await?;

        if first.status != 401 {
            return Ok(first);
        }

        info!("upstream returned 401, invalidating token cache and retrying once");
        self.token_cache.invalidate().await;
        let refreshed_token = self
            .token_cache
            .get()
            .await
            .map_err(|_| CoreError::auth_failure("failed to refresh access token after 401"))?;

        let second = self
            .transport
            .generate(GenerateRequest {
                url: url.to_string(),
                access_token: refreshed_token,
                body,
                streaming,
            })
            .await?;

        if second.status == 401 {
            return Err(CoreError::auth_failure_terminal(
                "upstream returned 401 twice; not retrying further",
            ));
        }

        Ok(second)
    }

    async fn run_streaming(
        &self,
        response: crate::transport::UpstreamResponse,
        assembler: &mut StreamAssembler,
        sink: &mut dyn ResponseSink,
        ctx: &RequestContext,
    ) -> CoreResult<ExecuteOutcome> {
        use futures::StreamExt;

        assembler.start(sink).await?;

        let mut decoder = FrameDecoder::new();
        let mut body = response.body;
        let started = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = ctx.cancellation.cancelled() => {
                    warn!(elapsed_ms = started.elapsed().as_millis() as u64, "client cancelled mid-stream");
                    let _ = assembler.finish(sink, 0).await;
                    sink.finish().await;
                    return Ok(ExecuteOutcome::Cancelled);
                }
                chunk = body.next() => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            let frames = decoder.push(&bytes)?;
                            for frame in &frames {
                                assembler.process_frame(frame, sink).await?;
                            }
                        }
                        Some(Err(e)) => return Err(e),
                        None => break,
                    }
                }
            }
        }

        let output_tokens = estimate_output_tokens(assembler);
        assembler.finish(sink, output_tokens).await?;
        sink.finish().await;
        Ok(ExecuteOutcome::Completed)
    }

    async fn run_aggregating(
        &self,
        response: crate::transport::UpstreamResponse,
        assembler: &mut StreamAssembler,
        sink: &mut dyn ResponseSink,
        input_tokens: i64,
    ) -> CoreResult<ExecuteOutcome> {
        let body = response.collect_body().await?;
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&body)?;
        for frame in &frames {
            assembler.process_frame_aggregating(frame);
        }

        let output_tokens = estimate_output_tokens(assembler);
        let aggregated = assembler.aggregate(input_tokens, output_tokens);
        let json = serde_json::to_vec(&aggregated)
            .map_err(|e| CoreError::format_conversion(format!("aggregate encode failed: {e}")))?;
        sink.write_chunk(Bytes::from(json)).await?;
        sink.finish().await;
        Ok(ExecuteOutcome::Completed)
    }
}

/// Output-token estimate for `usage`, applying the same heuristic (§4.B) to
/// the assembled completion text that admission applied to the request.
fn estimate_output_tokens(assembler: &StreamAssembler) -> i64 {
    crate::tokens::estimate_text(assembler.completion_text()).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_types::{ClientMessage, MessageContent, Role};
    use crate::sink::VecSink;
    use crate::transport::{TokenRefreshRequest, TokenRefreshResponse, UpstreamResponse};
    use async_trait::async_trait;
    use futures::stream;
    use futures::StreamExt as _;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn s1_frame_bytes() -> Vec<u8> {
        let payload = serde_json::json!({
            "content": "Hello",
            "messageStatus": "Completed",
            "contentType": "markdown"
        });
        let payload_bytes = serde_json::to_vec(&payload).unwrap();
        let header_name = ":event-type";
        let header_value = "assistantResponseEvent";
        let mut headers = Vec::new();
        headers.push(header_name.len() as u8);
        headers.extend_from_slice(header_name.as_bytes());
        headers.push(7u8);
        headers.extend_from_slice(&(header_value.len() as u16).to_be_bytes());
        headers.extend_from_slice(header_value.as_bytes());

        let header_length = headers.len() as u32;
        let total_length = 16 + header_length + payload_bytes.len() as u32;
        let mut out = Vec::new();
        out.extend_from_slice(&total_length.to_be_bytes());
        out.extend_from_slice(&header_length.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&headers);
        out.extend_from_slice(&payload_bytes);
        out.extend_from_slice(&0u32.to_be_bytes());
        out
    }

    struct ScriptedTransport {
        generate_statuses: Mutex<Vec<u16>>,
        refresh_calls: AtomicUsize,
        generate_calls: AtomicUsize,
    }

    #[async_trait]
    impl UpstreamTransport for ScriptedTransport {
        async fn refresh_token(
            &self,
            _req: TokenRefreshRequest,
        ) -> CoreResult<TokenRefreshResponse> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            Ok(TokenRefreshResponse {
                access_token: "tok".to_string(),
                expires_in: 3600,
                refresh_token: None,
                profile_arn: None,
            })
        }

        async fn generate(&self, _req: GenerateRequest) -> CoreResult<UpstreamResponse> {
            self.generate_calls.fetch_add(1, Ordering::SeqCst);
            let status = self.generate_statuses.lock().unwrap().remove(0);
            let body = if status == 200 {
                vec![Ok(Bytes::from(s1_frame_bytes()))]
            } else {
                vec![Ok(Bytes::new())]
            };
            Ok(UpstreamResponse {
                status,
                body: stream::iter(body).boxed(),
            })
        }

        async fn usage_limits(&self, _url: &str, _token: &str) -> CoreResult<UpstreamResponse> {
            Ok(UpstreamResponse {
                status: 200,
                body: stream::iter(vec![Ok(Bytes::new())]).boxed(),
            })
        }
    }

    fn ctx(stream: bool) -> RequestContext {
        RequestContext {
            chat_request: ChatRequest {
                model: "claude-sonnet-4-5".into(),
                system: None,
                messages: vec![ClientMessage {
                    role: Role::User,
                    content: MessageContent::Text("Hi".into()),
                }],
                tools: None,
                tool_choice: None,
                stream,
            },
            conversation_id_header: Some("conv-fixed".into()),
            agent_continuation_id_header: Some("cont-fixed".into()),
            forwarded_for: None,
            real_ip: None,
            remote_addr: "127.0.0.1".into(),
            user_agent: "test-agent".into(),
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn s1_plain_streaming_completion() {
        let transport = Arc::new(ScriptedTransport {
            generate_statuses: Mutex::new(vec![200]),
            refresh_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
        });
        let adapter = Adapter::new(ProviderConfig::social("rtok"), transport.clone());
        let mut sink = VecSink::new();

        let outcome = adapter.execute(&ctx(true), &mut sink).await.unwrap();
        assert_eq!(outcome, ExecuteOutcome::Completed);
        let rendered = sink.as_string();
        assert!(rendered.contains("event: message_start"));
        assert!(rendered.contains("\"stop_reason\":\"end_turn\""));
        assert_eq!(transport.generate_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn s4_token_expiry_mid_flight_retries_once() {
        let transport = Arc::new(ScriptedTransport {
            generate_statuses: Mutex::new(vec![401, 200]),
            refresh_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
        });
        let adapter = Adapter::new(ProviderConfig::social("rtok"), transport.clone());
        let mut sink = VecSink::new();

        let outcome = adapter.execute(&ctx(true), &mut sink).await.unwrap();
        assert_eq!(outcome, ExecuteOutcome::Completed);
        assert_eq!(transport.generate_calls.load(Ordering::SeqCst), 2);
        assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn two_consecutive_401s_surface_as_auth_failure() {
        let transport = Arc::new(ScriptedTransport {
            generate_statuses: Mutex::new(vec![401, 401]),
            refresh_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
        });
        let adapter = Adapter::new(ProviderConfig::social("rtok"), transport.clone());
        let mut sink = VecSink::new();

        let result = adapter.execute(&ctx(true), &mut sink).await;
        match result {
            Err(CoreError::AuthFailure { retryable, .. }) => assert!(!retryable),
            other => panic!("expected a terminal AuthFailure, got {other:?}"),
        }
        assert_eq!(transport.generate_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn s3_non_streaming_collection() {
        let transport = Arc::new(ScriptedTransport {
            generate_statuses: Mutex::new(vec![200]),
            refresh_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
        });
        let adapter = Adapter::new(ProviderConfig::social("rtok"), transport.clone());
        let mut sink = VecSink::new();

        adapter.execute(&ctx(false), &mut sink).await.unwrap();
        let rendered = sink.as_string();
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["content"][0]["text"], "Hello");
        assert_eq!(parsed["stop_reason"], "end_turn");
        assert!(parsed["usage"]["output_tokens"].as_i64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn s5_client_disconnect_mid_stream_is_not_an_error() {
        let transport = Arc::new(ScriptedTransport {
            generate_statuses: Mutex::new(vec![200]),
            refresh_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
        });
        let adapter = Adapter::new(ProviderConfig::social("rtok"), transport.clone());
        let mut sink = VecSink::new();
        let request_ctx = ctx(true);
        request_ctx.cancellation.cancel();

        let outcome = adapter.execute(&request_ctx, &mut sink).await.unwrap();
        assert_eq!(outcome, ExecuteOutcome::Cancelled);
        assert!(!sink.chunks.is_empty());
    }

    #[tokio::test]
    async fn non_2xx_after_retry_surfaces_as_upstream_status() {
        let transport = Arc::new(ScriptedTransport {
            generate_statuses: Mutex::new(vec![500]),
            refresh_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
        });
        let adapter = Adapter::new(ProviderConfig::social("rtok"), transport.clone());
        let mut sink = VecSink::new();

        let result = adapter.execute(&ctx(true), &mut sink).await;
        match result {
            Err(CoreError::UpstreamStatus { status, .. }) => assert_eq!(status, 500),
            other => panic!("expected UpstreamStatus, got {other:?}"),
        }
    }
}
