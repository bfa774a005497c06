use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    #[default]
    Direct,
    Group,
    Thread,
}

impl fmt::Display for ConversationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationKind::Direct => f.write_str("direct"),
            ConversationKind::Group => f.write_str("group"),
            ConversationKind::Thread => f.write_str("thread"),
        }
    }
}

impl FromStr for ConversationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(ConversationKind::Direct),
            "group" => Ok(ConversationKind::Group),
            "thread" => Ok(ConversationKind::Thread),
            other => Err(format!("unknown conversation kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Owner,
    Admin,
    #[default]
    Member,
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParticipantRole::Owner => f.write_str("owner"),
            ParticipantRole::Admin => f.write_str("admin"),
            ParticipantRole::Member => f.write_str("member"),
        }
    }
}

impl FromStr for ParticipantRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(ParticipantRole::Owner),
            "admin" => Ok(ParticipantRole::Admin),
            "member" => Ok(ParticipantRole::Member),
            other => Err(format!("unknown participant role: {other}")),
        }
    }
}

/// A bot-scoped message container. Threads carry a weak parent reference to
/// the conversation their platform thread forked from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub bot_id: String,
    pub kind: ConversationKind,
    pub parent_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Membership row. The participant key is usually a channel identity id;
/// for group conversations the owner row carries the bot owner's user id
/// instead, so a group is never orphaned when its first sender leaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub conversation_id: String,
    pub participant_key: String,
    pub role: ParticipantRole,
    pub created_at: String,
}

/// Maps an external (platform, conversation, thread) tuple to an internal
/// conversation, remembering where replies should be sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    pub bot_id: String,
    pub platform: String,
    pub external_conversation_id: String,
    /// Empty string when the route is not thread-scoped; part of the
    /// uniqueness fingerprint either way.
    pub thread_id: String,
    pub conversation_id: String,
    pub reply_target: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub bot_id: String,
    pub route_id: Option<String>,
    pub sender_identity_id: Option<String>,
    pub sender_user_id: Option<String>,
    pub platform: String,
    pub external_message_id: Option<String>,
    /// user | assistant | tool | system
    pub role: String,
    /// Opaque message body; shape is owned by the normalizer.
    pub content: serde_json::Value,
    pub metadata: serde_json::Value,
    pub created_at: String,
}

/// Input for a message append; ids and the timestamp are assigned by the store.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub conversation_id: String,
    pub bot_id: String,
    pub route_id: Option<String>,
    pub sender_identity_id: Option<String>,
    pub sender_user_id: Option<String>,
    pub platform: String,
    pub external_message_id: Option<String>,
    pub role: String,
    pub content: serde_json::Value,
    pub metadata: serde_json::Value,
}

/// Everything the channel manager needs after routing one inbound message.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    pub conversation_id: String,
    pub route_id: String,
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct ResolveChatArgs<'a> {
    pub bot_id: &'a str,
    /// Used as the owner participant key for group conversations.
    pub bot_owner_user_id: &'a str,
    pub platform: &'a str,
    pub external_conversation_id: &'a str,
    /// Empty = not a thread.
    pub thread_id: &'a str,
    /// Platform's own conversation-type tag; "", "p2p" and "private" all
    /// mean direct.
    pub conversation_type: &'a str,
    pub channel_identity_id: &'a str,
    pub reply_target: &'a str,
}

/// How a caller is allowed to read a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Participant,
    /// Read-only visibility gained because one of the requesting user's
    /// linked channel identities has appeared in the conversation.
    ObservedThroughChannelIdentity,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Participant => f.write_str("participant"),
            AccessMode::ObservedThroughChannelIdentity => {
                f.write_str("observed-through-channel-identity")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReadAccess {
    pub mode: AccessMode,
    /// Set only in participant mode.
    pub role: Option<ParticipantRole>,
    /// Set only in observed mode.
    pub last_observed_at: Option<String>,
}

/// One row of the per-identity conversation listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationListing {
    pub conversation: Conversation,
    pub access_mode: AccessMode,
    pub role: Option<ParticipantRole>,
    pub last_observed_at: Option<String>,
}
