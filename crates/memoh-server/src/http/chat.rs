//! Chat endpoints — POST /bots/{bot}/messages and its streaming variant.
//!
//! The local HTTP surface is itself a platform ("webchat"): requests run
//! through the same identity/conversation intake as external adapters, so
//! the message log, presence and history behave identically everywhere.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::Json;
use futures_util::{Stream, StreamExt};
use memoh_agent::{terminal_round, SseFrame};
use memoh_channels::{extract_reply_text, InboundMessage};
use memoh_chat::ChatRequest;
use memoh_conversations::{NewMessage, ResolveChatArgs};
use memoh_protocol::normalize_message;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::app::AppState;
use crate::auth::authenticate;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct ChatBody {
    pub message: String,
    /// Conversation slot on the webchat platform. Defaults to "default".
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Serialize)]
pub struct ChatReply {
    pub reply: String,
    pub conversation_id: String,
}

/// POST /bots/{bot}/messages — synchronous chat.
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Path(bot_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ChatBody>,
) -> Result<Json<ChatReply>, ApiError> {
    let actor = authenticate(&state.tokens, &state.directory, &headers)?;
    state.directory.authorize(&actor.id, &bot_id, true)?;

    if body.message.trim().is_empty() {
        return Err(ApiError::validation("message must not be empty"));
    }

    ensure_webchat_identity(&state, &actor.id, &actor.username)?;
    let inbound = webchat_inbound(&bot_id, &actor.id, &actor.username, &body);
    let outcome = state.intake.handle(inbound).await?;

    state.publish_message(&bot_id, json!(outcome.user_message));
    if let Some(assistant) = &outcome.assistant_message {
        state.publish_message(&bot_id, json!(assistant));
    }

    // Platforms with a registered adapter get the reply pushed; webchat
    // reads it from this response instead.
    if let Some(outbound) = &outcome.outbound {
        let channels = state.channels.lock().await;
        if channels.names().iter().any(|n| n == &outbound.platform) {
            if let Err(e) = channels.dispatch(outbound).await {
                warn!(error = %e, platform = %outbound.platform, "outbound dispatch failed");
            }
        }
    }

    let reply = outcome
        .outbound
        .map(|o| o.content)
        .unwrap_or_default();
    Ok(Json(ChatReply {
        reply,
        conversation_id: outcome.conversation_id,
    }))
}

/// POST /bots/{bot}/messages/stream — SSE chat.
///
/// Frames are `data: <json>` in wire order, terminated by `data: [DONE]`.
/// Closing the response cancels the gateway stream; no partial round is
/// persisted in that case.
pub async fn chat_stream_handler(
    State(state): State<Arc<AppState>>,
    Path(bot_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ChatBody>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>, ApiError> {
    let actor = authenticate(&state.tokens, &state.directory, &headers)?;
    let bot = state.directory.authorize(&actor.id, &bot_id, true)?;

    if body.message.trim().is_empty() {
        return Err(ApiError::validation("message must not be empty"));
    }

    let identity = ensure_webchat_identity(&state, &actor.id, &actor.username)?;
    let session_slot = body.session_id.clone().unwrap_or_else(|| "default".into());
    let resolved = state.conversations.resolve_chat(&ResolveChatArgs {
        bot_id: &bot.id,
        bot_owner_user_id: &bot.owner_user_id,
        platform: "webchat",
        external_conversation_id: &session_slot,
        thread_id: "",
        conversation_type: "p2p",
        channel_identity_id: &identity.id,
        reply_target: "",
    })?;

    let user_message = state.conversations.append_message(NewMessage {
        conversation_id: resolved.conversation_id.clone(),
        bot_id: bot.id.clone(),
        route_id: Some(resolved.route_id.clone()),
        sender_identity_id: Some(identity.id.clone()),
        sender_user_id: Some(actor.id.clone()),
        platform: "webchat".to_string(),
        external_message_id: None,
        role: "user".to_string(),
        content: json!(body.message),
        metadata: json!({}),
    })?;
    state.publish_message(&bot.id, json!(user_message));

    let request = ChatRequest {
        query: body.message.clone(),
        bot_id: bot.id.clone(),
        session: resolved.conversation_id.clone(),
        contact_id: identity.id.clone(),
        contact_name: actor.username.clone(),
        user_id: Some(actor.id.clone()),
        current_channel: "webchat".to_string(),
        current_platform: Some("webchat".to_string()),
        ..Default::default()
    };

    let cancel = CancellationToken::new();
    let mut chat_stream = state.resolver.stream_chat(&request, cancel.clone());

    let conversation_id = resolved.conversation_id;
    let route_id = resolved.route_id;
    let stream = async_stream::stream! {
        // Dropping the response body cancels the upstream gateway stream.
        let _cancel_guard = cancel.drop_guard();
        let mut stored = false;

        while let Some(chunk) = chat_stream.chunks.recv().await {
            if !stored {
                if let Some(reply) = assistant_text_of_terminal(&chunk) {
                    stored = true;
                    record_assistant_reply(&state, &bot_id, &conversation_id, &route_id, &reply);
                }
            }
            yield Event::default().data(chunk.to_string());
        }

        if let Some(err) = chat_stream.errors.recv().await {
            warn!(error = %err, conversation_id = %conversation_id, "stream failed");
            yield Event::default()
                .data(json!({"type": "error", "error": err.to_string()}).to_string());
        }

        yield Event::default().data("[DONE]");
    };

    Ok(Sse::new(stream.map(Ok::<_, Infallible>)))
}

/// The webchat channel identity for a local user, linked on first use.
fn ensure_webchat_identity(
    state: &AppState,
    user_id: &str,
    username: &str,
) -> Result<memoh_identity::ChannelIdentity, ApiError> {
    let identity = state
        .identities
        .get_or_create("webchat", user_id, username)?;
    if identity.user_id.is_none() {
        return Ok(state.identities.link_to_user(&identity.id, user_id)?);
    }
    Ok(identity)
}

fn webchat_inbound(
    bot_id: &str,
    user_id: &str,
    username: &str,
    body: &ChatBody,
) -> InboundMessage {
    InboundMessage {
        platform: "webchat".to_string(),
        bot_id: bot_id.to_string(),
        external_conversation_id: body
            .session_id
            .clone()
            .unwrap_or_else(|| "default".to_string()),
        thread_id: String::new(),
        conversation_type: "p2p".to_string(),
        external_subject_id: user_id.to_string(),
        sender_display_name: username.to_string(),
        external_message_id: None,
        content: body.message.clone(),
        reply_target: String::new(),
    }
}

/// When a forwarded chunk is a stream terminal, pull the assistant reply
/// text out of its message list.
fn assistant_text_of_terminal(chunk: &Value) -> Option<String> {
    let frame = SseFrame {
        event: None,
        data: chunk.to_string(),
    };
    let payload = terminal_round(&frame)?;
    let mut normalized = Vec::new();
    for raw in &payload.messages {
        if let Value::Object(map) = raw {
            normalized.extend(normalize_message(map));
        }
    }
    extract_reply_text(&normalized)
}

/// Mirror the round's reply into the conversation log so list/events see
/// it; failures are logged, the stream itself is unaffected.
fn record_assistant_reply(
    state: &AppState,
    bot_id: &str,
    conversation_id: &str,
    route_id: &str,
    reply: &str,
) {
    match state.conversations.append_message(NewMessage {
        conversation_id: conversation_id.to_string(),
        bot_id: bot_id.to_string(),
        route_id: Some(route_id.to_string()),
        sender_identity_id: None,
        sender_user_id: None,
        platform: "webchat".to_string(),
        external_message_id: None,
        role: "assistant".to_string(),
        content: json!(reply),
        metadata: json!({}),
    }) {
        Ok(message) => state.publish_message(bot_id, json!(message)),
        Err(e) => debug!(error = %e, "assistant message append failed"),
    }
}
