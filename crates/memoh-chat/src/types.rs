use memoh_core::types::Provider;
use memoh_protocol::{Envelope, NormalizedMessage};
use tokio::sync::mpsc;

use crate::error::ChatError;

/// One inbound chat invocation, as assembled by the HTTP layer or the
/// channel manager. Messages ride in the gateway's opaque map shape.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub query: String,
    pub bot_id: String,
    pub session: String,
    /// Explicit model override; wins over bot and user settings.
    pub model: Option<String>,
    /// Extra request-supplied messages appended after the history window.
    pub messages: Vec<serde_json::Value>,
    pub skills: Vec<String>,
    pub container_id: Option<String>,
    /// History window in minutes. `None` defers to settings; a negative
    /// value skips history loading entirely.
    pub max_context_minutes: Option<i64>,
    pub channels: Vec<String>,
    pub current_channel: String,
    pub allowed_actions: Option<Vec<String>>,
    pub contact_id: String,
    pub contact_name: String,
    pub contact_alias: Option<String>,
    pub user_id: Option<String>,
    pub current_platform: Option<String>,
    pub reply_target: Option<String>,
    pub session_token: Option<String>,
}

/// The fully assembled per-request context, ready to POST.
#[derive(Debug, Clone)]
pub struct ResolvedContext {
    pub envelope: Envelope,
    pub model_id: String,
    pub provider: Provider,
    pub skills: Vec<String>,
}

/// A completed round as returned to callers of the sync paths.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub messages: Vec<NormalizedMessage>,
    pub skills: Vec<String>,
    pub model_id: String,
    pub provider: Provider,
}

/// The pair of output streams a stream call hands back.
///
/// `chunks` carries opaque JSON frames in wire order. `errors` is
/// single-shot: it delivers at most one value, after every chunk sent
/// before the failure, then closes. Both close on cancellation.
pub struct ChatStream {
    pub chunks: mpsc::Receiver<serde_json::Value>,
    pub errors: mpsc::Receiver<ChatError>,
}
