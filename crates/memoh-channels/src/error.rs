use thiserror::Error;

/// Errors from channel adapters and the inbound intake pipeline.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The underlying transport could not be established.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A message could not be delivered to the remote endpoint.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The platform rejected the supplied credentials or token.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Bot not found: {0}")]
    BotNotFound(String),

    #[error("Identity error: {0}")]
    Identity(#[from] memoh_identity::IdentityError),

    #[error("Conversation error: {0}")]
    Conversation(#[from] memoh_conversations::ConversationError),

    #[error("Directory error: {0}")]
    Directory(#[from] memoh_users::UserError),

    #[error("Chat error: {0}")]
    Chat(#[from] memoh_chat::ChatError),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
