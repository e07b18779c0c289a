// src/transport.rs
// Upstream transport abstraction (§4.J, added) and its production
// implementation over `reqwest`.
//
// Grounded on the teacher's pattern of hiding a concrete `reqwest::Client`
// behind a provider-shaped trait (`llm/provider/mod.rs`'s `LlmProvider`,
// implemented by `gpt5.rs`'s `Gpt5Provider`) so the token cache and adapter
// can be exercised against a scriptable fake without a mock-HTTP crate.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::{CoreError, CoreResult};

/// Request body for a bearer-token refresh (§4.E).
pub enum TokenRefreshRequest {
    Social {
        url: String,
        refresh_token: String,
    },
    Idc {
        url: String,
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
}

#[derive(Debug, Clone)]
pub struct TokenRefreshResponse {
    pub access_token: String,
    pub expires_in: i64,
    pub refresh_token: Option<String>,
    pub profile_arn: Option<String>,
}

pub struct GenerateRequest {
    pub url: String,
    pub access_token: String,
    pub body: Vec<u8>,
    pub streaming: bool,
}

/// A byte stream the caller can drive to completion, plus the status the
/// upstream answered with. Non-streaming callers read it to the end; the
/// streaming path feeds chunks straight into §4.A as they arrive.
pub struct UpstreamResponse {
    pub status: u16,
    pub body: BoxStream<'static, CoreResult<Bytes>>,
}

impl UpstreamResponse {
    /// Drain the body into a single buffer (non-streaming / error paths).
    pub async fn collect_body(mut self) -> CoreResult<Vec<u8>> {
        use futures::StreamExt;
        let mut buf = Vec::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf)
    }
}

#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    async fn refresh_token(&self, req: TokenRefreshRequest) -> CoreResult<TokenRefreshResponse>;
    async fn generate(&self, req: GenerateRequest) -> CoreResult<UpstreamResponse>;
    async fn usage_limits(&self, url: &str, access_token: &str) -> CoreResult<UpstreamResponse>;
}

/// Three opaque identity headers mimicking a known native client (§4.H,
/// §9 "Hard-coded UA strings"). Forwarded verbatim on every upstream
/// request, including retries; do not parameterize.
pub const IDENTITY_AGENT_MODE_HEADER: (&str, &str) = ("x-amzn-kiro-agent-mode", "vibe");
pub const IDENTITY_AMZ_USER_AGENT_HEADER: (&str, &str) = (
    "x-amz-user-agent",
    "aws-sdk-js/2.1692.0 KiroIDE-0.1.0",
);
pub const IDENTITY_USER_AGENT_HEADER: (&str, &str) = (
    "user-agent",
    "KiroIDE/0.1.0 (desktop; native-client)",
);

/// Production implementation over a shared `reqwest::Client` (§4.H "HTTP
/// client"): 15s dial timeout, no overall request timeout (streaming
/// responses are arbitrarily long; cancellation is the caller's job).
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .tcp_keepalive(Duration::from_secs(30))
            .use_rustls_tls()
            .http1_only()
            .build()
            .map_err(|e| CoreError::transport(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }

    fn with_identity_headers(req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header(IDENTITY_AGENT_MODE_HEADER.0, IDENTITY_AGENT_MODE_HEADER.1)
            .header(IDENTITY_AMZ_USER_AGENT_HEADER.0, IDENTITY_AMZ_USER_AGENT_HEADER.1)
            .header(IDENTITY_USER_AGENT_HEADER.0, IDENTITY_USER_AGENT_HEADER.1)
    }

    fn stream_response(resp: reqwest::Response) -> UpstreamResponse {
        use futures::StreamExt;
        let status = resp.status().as_u16();
        let body = resp
            .bytes_stream()
            .map(|r| r.map_err(|e| CoreError::transport(format!("stream read failed: {e}"))))
            .boxed();
        UpstreamResponse { status, body }
    }
}

#[async_trait]
impl UpstreamTransport for ReqwestTransport {
    async fn refresh_token(&self, req: TokenRefreshRequest) -> CoreResult<TokenRefreshResponse> {
        let resp = match req {
            TokenRefreshRequest::Social { url, refresh_token } => self
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .json(&serde_json::json!({ "refresh_token": refresh_token }))
                .send()
                .await
                .map_err(|e| CoreError::transport(format!("refresh token request failed: {e}")))?,
            TokenRefreshRequest::Idc {
                url,
                client_id,
                client_secret,
                refresh_token,
            } => Self::with_identity_headers(self.client.post(&url))
                .header("Accept", "application/json")
                .header("Accept-Language", "en-US")
                .json(&serde_json::json!({
                    "client_id": client_id,
                    "client_secret": client_secret,
                    "grant_type": "refresh_token",
                    "refresh_token": refresh_token,
                }))
                .send()
                .await
                .map_err(|e| CoreError::transport(format!("refresh token request failed: {e}")))?,
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let truncated: String = body.chars().take(500).collect();
            return Err(CoreError::upstream_status(status.as_u16(), truncated));
        }

        resp.json::<TokenRefreshResponse>()
            .await
            .map_err(|e| CoreError::format_conversion(format!("refresh response parse: {e}")))
    }

    async fn generate(&self, req: GenerateRequest) -> CoreResult<UpstreamResponse> {
        let mut builder = Self::with_identity_headers(self.client.post(&req.url))
            .header("Authorization", format!("Bearer {}", req.access_token))
            .header("Content-Type", "application/json")
            .body(req.body);
        if req.streaming {
            builder = builder.header("Accept", "text/event-stream");
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| CoreError::transport(format!("generate request failed: {e}")))?;
        Ok(Self::stream_response(resp))
    }

    async fn usage_limits(&self, url: &str, access_token: &str) -> CoreResult<UpstreamResponse> {
        let resp = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {access_token}"))
            .send()
            .await
            .map_err(|e| CoreError::transport(format!("usage limits request failed: {e}")))?;
        Ok(Self::stream_response(resp))
    }
}

impl<'de> serde::Deserialize<'de> for TokenRefreshResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        struct Raw {
            access_token: String,
            expires_in: i64,
            #[serde(default)]
            refresh_token: Option<String>,
            #[serde(default)]
            profile_arn: Option<String>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(TokenRefreshResponse {
            access_token: raw.access_token,
            expires_in: raw.expires_in,
            refresh_token: raw.refresh_token,
            profile_arn: raw.profile_arn,
        })
    }
}
