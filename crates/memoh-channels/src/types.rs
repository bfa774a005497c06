use serde::{Deserialize, Serialize};

/// A message received from an external platform, already translated out of
/// the platform SDK's event shape by the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Lowercase platform tag (e.g. "feishu", "telegram", "webchat").
    pub platform: String,

    /// The bot this adapter serves.
    pub bot_id: String,

    /// Platform-native conversation identifier.
    pub external_conversation_id: String,

    /// Platform-native thread identifier; empty when the message is not in
    /// a thread.
    #[serde(default)]
    pub thread_id: String,

    /// The platform's own conversation-type tag ("p2p", "group", …).
    #[serde(default)]
    pub conversation_type: String,

    /// Platform-native identifier for the sender.
    pub external_subject_id: String,

    /// Human-readable sender name, if the platform provides one.
    #[serde(default)]
    pub sender_display_name: String,

    /// Platform-native message id, for dedup and audit.
    #[serde(default)]
    pub external_message_id: Option<String>,

    /// Plain text content of the message.
    pub content: String,

    /// Where a reply to this message should be addressed.
    #[serde(default)]
    pub reply_target: String,
}

/// A reply ready for delivery on its originating platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub platform: String,
    /// The route's reply target (chat id, webhook address, …).
    pub reply_target: String,
    pub content: String,
}

/// Runtime connection state of a channel adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Connected,
    Connecting,
    Disconnected,
    Error(String),
}
