//! Inbound-message intake: the pipeline between a platform adapter and the
//! chat resolver.
//!
//! One inbound message is resolved to a bot, a channel identity and a
//! conversation/route, persisted, answered through the resolver, and turned
//! into an outbound reply addressed at the route's reply target.

use std::sync::Arc;

use memoh_chat::{ChatRequest, ChatResolver};
use memoh_conversations::{ConversationStore, Message, NewMessage, ResolveChatArgs};
use memoh_identity::IdentityService;
use memoh_protocol::{MessageBody, NormalizedMessage};
use memoh_users::Directory;
use serde_json::json;
use tracing::{debug, info};

use crate::error::{ChannelError, Result};
use crate::types::{InboundMessage, OutboundMessage};

/// Everything one routed message produced, for the caller to publish or
/// dispatch.
pub struct IntakeOutcome {
    pub conversation_id: String,
    pub route_id: String,
    pub user_message: Message,
    pub assistant_message: Option<Message>,
    pub outbound: Option<OutboundMessage>,
}

pub struct Intake {
    directory: Arc<Directory>,
    identities: Arc<IdentityService>,
    conversations: Arc<ConversationStore>,
    resolver: Arc<ChatResolver>,
}

impl Intake {
    pub fn new(
        directory: Arc<Directory>,
        identities: Arc<IdentityService>,
        conversations: Arc<ConversationStore>,
        resolver: Arc<ChatResolver>,
    ) -> Self {
        Self {
            directory,
            identities,
            conversations,
            resolver,
        }
    }

    /// Route one inbound message end to end.
    pub async fn handle(&self, inbound: InboundMessage) -> Result<IntakeOutcome> {
        let bot = self
            .directory
            .get_bot(&inbound.bot_id)?
            .filter(|b| b.active)
            .ok_or_else(|| ChannelError::BotNotFound(inbound.bot_id.clone()))?;

        let identity = self.identities.get_or_create(
            &inbound.platform,
            &inbound.external_subject_id,
            &inbound.sender_display_name,
        )?;

        let resolved = self.conversations.resolve_chat(&ResolveChatArgs {
            bot_id: &bot.id,
            bot_owner_user_id: &bot.owner_user_id,
            platform: &inbound.platform,
            external_conversation_id: &inbound.external_conversation_id,
            thread_id: &inbound.thread_id,
            conversation_type: &inbound.conversation_type,
            channel_identity_id: &identity.id,
            reply_target: &inbound.reply_target,
        })?;
        if resolved.created {
            info!(conversation_id = %resolved.conversation_id, platform = %inbound.platform,
                  "new conversation routed");
        }

        let user_message = self.conversations.append_message(NewMessage {
            conversation_id: resolved.conversation_id.clone(),
            bot_id: bot.id.clone(),
            route_id: Some(resolved.route_id.clone()),
            sender_identity_id: Some(identity.id.clone()),
            sender_user_id: identity.user_id.clone(),
            platform: inbound.platform.clone(),
            external_message_id: inbound.external_message_id.clone(),
            role: "user".to_string(),
            content: json!(inbound.content),
            metadata: json!({}),
        })?;

        let request = ChatRequest {
            query: inbound.content.clone(),
            bot_id: bot.id.clone(),
            session: resolved.conversation_id.clone(),
            contact_id: identity.id.clone(),
            contact_name: if inbound.sender_display_name.is_empty() {
                identity.external_subject_id.clone()
            } else {
                inbound.sender_display_name.clone()
            },
            user_id: identity.user_id.clone(),
            current_channel: inbound.platform.clone(),
            current_platform: Some(inbound.platform.clone()),
            reply_target: Some(inbound.reply_target.clone()),
            ..Default::default()
        };
        let response = self.resolver.chat(&request).await?;

        let reply_text = extract_reply_text(&response.messages);
        let mut assistant_message = None;
        let mut outbound = None;
        if let Some(text) = reply_text {
            let appended = self.conversations.append_message(NewMessage {
                conversation_id: resolved.conversation_id.clone(),
                bot_id: bot.id.clone(),
                route_id: Some(resolved.route_id.clone()),
                sender_identity_id: None,
                sender_user_id: None,
                platform: inbound.platform.clone(),
                external_message_id: None,
                role: "assistant".to_string(),
                content: json!(text),
                metadata: json!({"model": response.model_id}),
            })?;
            assistant_message = Some(appended);
            outbound = Some(OutboundMessage {
                platform: inbound.platform.clone(),
                reply_target: inbound.reply_target.clone(),
                content: text,
            });
        } else {
            debug!(conversation_id = %resolved.conversation_id,
                   "round produced no assistant text; nothing to dispatch");
        }

        Ok(IntakeOutcome {
            conversation_id: resolved.conversation_id,
            route_id: resolved.route_id,
            user_message,
            assistant_message,
            outbound,
        })
    }
}

/// The last assistant message's text, with part lists flattened.
pub fn extract_reply_text(messages: &[NormalizedMessage]) -> Option<String> {
    messages
        .iter()
        .rev()
        .filter(|m| m.role == "assistant")
        .find_map(|m| {
            let text = match &m.body {
                MessageBody::Text(text) => text.clone(),
                MessageBody::Parts(parts) => parts
                    .iter()
                    .map(|memoh_protocol::ContentPart::Text(t)| t.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
            };
            if text.trim().is_empty() {
                None
            } else {
                Some(text)
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoh_protocol::{ContentPart, MessageBody};

    fn assistant(text: &str) -> NormalizedMessage {
        NormalizedMessage {
            role: "assistant".to_string(),
            body: MessageBody::Text(text.to_string()),
            tool_calls: vec![],
            tool_call_id: None,
            name: None,
        }
    }

    #[test]
    fn reply_is_last_non_empty_assistant_text() {
        let messages = vec![
            assistant("first"),
            NormalizedMessage {
                role: "tool".to_string(),
                body: MessageBody::Text("ignored".to_string()),
                tool_calls: vec![],
                tool_call_id: Some("t1".to_string()),
                name: None,
            },
            assistant("final answer"),
            assistant("   "),
        ];
        assert_eq!(extract_reply_text(&messages).as_deref(), Some("final answer"));
    }

    #[test]
    fn part_lists_flatten_with_newlines() {
        let messages = vec![NormalizedMessage {
            role: "assistant".to_string(),
            body: MessageBody::Parts(vec![
                ContentPart::Text("a".to_string()),
                ContentPart::Text("b".to_string()),
            ]),
            tool_calls: vec![],
            tool_call_id: None,
            name: None,
        }];
        assert_eq!(extract_reply_text(&messages).as_deref(), Some("a\nb"));
    }
}
