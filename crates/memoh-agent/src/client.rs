use std::time::Duration;

use futures_util::StreamExt;
use memoh_protocol::{Envelope, RoundPayload};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{AgentError, Result};
use crate::sse::{FrameScanner, SseFrame};

/// Identity headers attached to every outbound gateway request, mirroring
/// what the tool host forwards on tool-side calls back into the backend.
/// Optional fields are only sent when the envelope carries them.
pub const HEADER_CHANNEL_IDENTITY_ID: &str = "x-memoh-channel-identity-id";
pub const HEADER_SESSION_TOKEN: &str = "x-memoh-session-token";
pub const HEADER_CURRENT_PLATFORM: &str = "x-memoh-current-platform";
pub const HEADER_REPLY_TARGET: &str = "x-memoh-reply-target";

/// HTTP + SSE client for the remote agent gateway.
///
/// Two underlying reqwest clients: the sync one carries the configured
/// request timeout; the streaming one has none, because a live stream may
/// legitimately run for minutes and the caller's cancellation token is the
/// authority on when to stop.
pub struct GatewayClient {
    base_url: String,
    /// Service-level bearer for the gateway. Requests without one fall
    /// back to the per-round session token from the envelope.
    auth_token: Option<String>,
    http: reqwest::Client,
    streaming: reqwest::Client,
}

impl GatewayClient {
    pub fn new(base_url: &str, chat_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(chat_timeout)
            .build()?;
        let streaming = reqwest::Client::builder().build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: None,
            http,
            streaming,
        })
    }

    /// Attach a service bearer token sent as `Authorization` on every
    /// gateway request.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.auth_token = (!token.is_empty()).then_some(token);
        self
    }

    /// Synchronous chat: POST the envelope, block until the gateway returns
    /// the completed round.
    pub async fn chat(&self, envelope: &Envelope) -> Result<RoundPayload> {
        self.post_round("/chat/", envelope).await
    }

    /// Schedule-triggered chat; same response shape as `chat`.
    pub async fn trigger_schedule(&self, envelope: &Envelope) -> Result<RoundPayload> {
        self.post_round("/chat/trigger-schedule", envelope).await
    }

    /// Streaming chat: POST the envelope and forward every SSE frame to
    /// `tx` in wire order until EOF, error, or cancellation.
    ///
    /// The demultiplexing of terminals (and round persistence) is the
    /// caller's job; this method only guarantees framing and ordering.
    pub async fn stream(
        &self,
        envelope: &Envelope,
        tx: mpsc::Sender<SseFrame>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let request = self.identity_request(&self.streaming, "/chat/stream", envelope);
        let response = tokio::select! {
            r = request.send() => r?,
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
        };
        let response = check_status(response).await?;

        let mut scanner = FrameScanner::new();
        let mut body = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                c = body.next() => c,
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            };
            let chunk = match chunk {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => return Err(AgentError::Http(e)),
                None => break, // EOF
            };

            for frame in scanner.push_chunk(&chunk)? {
                if tx.send(frame).await.is_err() {
                    debug!("stream subscriber dropped; stopping reader");
                    return Ok(());
                }
            }
        }

        if let Some(frame) = scanner.finish() {
            let _ = tx.send(frame).await;
        }
        Ok(())
    }

    async fn post_round(&self, path: &str, envelope: &Envelope) -> Result<RoundPayload> {
        let response = self
            .identity_request(&self.http, path, envelope)
            .send()
            .await?;
        let response = check_status(response).await?;
        let payload = response
            .json::<RoundPayload>()
            .await
            .map_err(|e| AgentError::Protocol(format!("bad round payload: {e}")))?;
        Ok(payload)
    }

    /// Build a POST carrying the envelope plus the identity headers the
    /// gateway threads through to tool-side requests.
    fn identity_request(
        &self,
        client: &reqwest::Client,
        path: &str,
        envelope: &Envelope,
    ) -> reqwest::RequestBuilder {
        let identity = &envelope.identity;
        let mut request = client
            .post(format!("{}{}", self.base_url, path))
            .json(envelope);

        if let Some(token) = self
            .auth_token
            .as_deref()
            .or(identity.session_token.as_deref())
        {
            request = request.bearer_auth(token);
        }
        if !identity.contact_id.is_empty() {
            request = request.header(HEADER_CHANNEL_IDENTITY_ID, &identity.contact_id);
        }
        if let Some(token) = &identity.session_token {
            request = request.header(HEADER_SESSION_TOKEN, token);
        }
        if let Some(platform) = &identity.current_platform {
            request = request.header(HEADER_CURRENT_PLATFORM, platform);
        }
        if let Some(target) = &identity.reply_target {
            request = request.header(HEADER_REPLY_TARGET, target);
        }
        request
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AgentError::Status {
        status: status.as_u16(),
        body: truncate(&body, 512),
    })
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoh_protocol::{IdentityBlock, ModelBlock};

    fn envelope(identity: IdentityBlock) -> Envelope {
        Envelope {
            model: ModelBlock {
                model_id: "claude-sonnet-4".into(),
                client_type: "anthropic".into(),
                input: vec![],
                api_key: String::new(),
                base_url: String::new(),
            },
            active_context_time: 0,
            channels: vec![],
            current_channel: "webchat".into(),
            allowed_actions: None,
            mcp_connections: vec![],
            messages: vec![],
            skills: vec![],
            usable_skills: vec![],
            query: "hi".into(),
            identity,
            attachments: vec![],
            schedule: None,
        }
    }

    fn identity() -> IdentityBlock {
        IdentityBlock {
            bot_id: "bot-1".into(),
            session_id: "s-1".into(),
            container_id: "mcp-bot-1".into(),
            contact_id: "ci-1".into(),
            contact_name: "Ada".into(),
            contact_alias: None,
            user_id: None,
            current_platform: Some("feishu".into()),
            reply_target: Some("oc_1".into()),
            session_token: Some("round-token".into()),
        }
    }

    #[test]
    fn identity_headers_ride_every_request() {
        let client = GatewayClient::new("http://gateway.local", Duration::from_secs(1)).unwrap();
        let request = client
            .identity_request(&client.http, "/chat/", &envelope(identity()))
            .build()
            .unwrap();

        let headers = request.headers();
        assert_eq!(headers["authorization"], "Bearer round-token");
        assert_eq!(headers[HEADER_CHANNEL_IDENTITY_ID], "ci-1");
        assert_eq!(headers[HEADER_SESSION_TOKEN], "round-token");
        assert_eq!(headers[HEADER_CURRENT_PLATFORM], "feishu");
        assert_eq!(headers[HEADER_REPLY_TARGET], "oc_1");
    }

    #[test]
    fn service_token_wins_over_session_token() {
        let client = GatewayClient::new("http://gateway.local", Duration::from_secs(1))
            .unwrap()
            .with_auth_token("service-token");
        let request = client
            .identity_request(&client.http, "/chat/", &envelope(identity()))
            .build()
            .unwrap();

        assert_eq!(request.headers()["authorization"], "Bearer service-token");
    }

    #[test]
    fn absent_identity_fields_send_no_headers() {
        let client = GatewayClient::new("http://gateway.local", Duration::from_secs(1)).unwrap();
        let mut bare = identity();
        bare.contact_id = String::new();
        bare.current_platform = None;
        bare.reply_target = None;
        bare.session_token = None;

        let request = client
            .identity_request(&client.http, "/chat/", &envelope(bare))
            .build()
            .unwrap();

        let headers = request.headers();
        assert!(headers.get("authorization").is_none());
        assert!(headers.get(HEADER_CHANNEL_IDENTITY_ID).is_none());
        assert!(headers.get(HEADER_SESSION_TOKEN).is_none());
        assert!(headers.get(HEADER_CURRENT_PLATFORM).is_none());
        assert!(headers.get(HEADER_REPLY_TARGET).is_none());
    }
}
