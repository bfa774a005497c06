use memoh_core::types::{BotKind, UserRole};
use serde::{Deserialize, Serialize};

/// An internal account. Channel identities link to users; bots are owned
/// by users. A user row is never deleted while any bot references it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    /// Argon2id PHC string. Never serialized out.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// A principal that owns messages, conversations and tool state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    pub id: String,
    pub owner_user_id: String,
    pub name: String,
    pub kind: BotKind,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Chat model configuration attached to a bot or a user. The resolver picks
/// the first non-empty model in request > bot > user order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatSettings {
    pub chat_model: Option<String>,
    /// Raw provider tag as stored; normalized into the closed set by the
    /// resolver, not here.
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// History window in minutes. Negative means "skip history entirely".
    pub max_context_minutes: Option<i64>,
}

/// A bot-scoped tool (MCP) connection the gateway should mount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConnection {
    pub id: String,
    pub bot_id: String,
    pub name: String,
    pub kind: String,
    /// Opaque connection config forwarded to the gateway verbatim.
    pub config: serde_json::Value,
    pub active: bool,
    pub created_at: String,
}
