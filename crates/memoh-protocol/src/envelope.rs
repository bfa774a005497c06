//! Wire types for the agent gateway request envelope.
//!
//! Field names follow the gateway's camelCase JSON exactly; everything the
//! backend does not interpret (mcp connection configs, attachments, raw
//! messages) stays `serde_json::Value`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub model: ModelBlock,
    /// History window in minutes, as resolved by the chat resolver.
    pub active_context_time: i64,
    pub channels: Vec<String>,
    pub current_channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_actions: Option<Vec<String>>,
    pub mcp_connections: Vec<serde_json::Value>,
    pub messages: Vec<serde_json::Value>,
    pub skills: Vec<String>,
    pub usable_skills: Vec<UsableSkill>,
    pub query: String,
    pub identity: IdentityBlock,
    pub attachments: Vec<serde_json::Value>,
    /// Present only on schedule-triggered requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelBlock {
    pub model_id: String,
    /// One of "openai" | "anthropic" | "google".
    pub client_type: String,
    #[serde(default)]
    pub input: Vec<serde_json::Value>,
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityBlock {
    pub bot_id: String,
    pub session_id: String,
    pub container_id: String,
    pub contact_id: String,
    pub contact_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsableSkill {
    pub name: String,
    pub description: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleBlock {
    pub id: String,
    pub name: String,
    pub description: String,
    pub pattern: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_calls: Option<i64>,
    pub command: String,
}

/// What a completed round carries: the gateway's message list plus the
/// skill tags it exercised. Both the sync response body and every stream
/// terminal decode into this.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoundPayload {
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
    #[serde(default)]
    pub skills: Vec<String>,
}
