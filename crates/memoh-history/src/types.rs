use serde::{Deserialize, Serialize};

/// One completed chat round: the user query plus everything the gateway
/// produced for it, stored append-only.
///
/// Messages are kept in their on-wire shape (opaque JSON maps) so replaying
/// them into a later envelope is lossless; the typed view lives in the
/// normalizer, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub bot_id: String,
    /// Session key; schedule-originated rounds use a "schedule:" prefix.
    pub session: String,
    pub messages: Vec<serde_json::Value>,
    pub skills: Vec<String>,
    pub created_at: String,
}
