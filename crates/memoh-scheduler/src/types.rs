use serde::{Deserialize, Serialize};

/// A persistent cron entry owned by a bot.
///
/// `enabled` is the source of truth at boot and after explicit
/// update/delete; while the executor runs, the in-memory entry map decides
/// what actually fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub bot_id: String,
    pub name: String,
    pub description: String,
    /// Cron pattern, five fields or six with a leading seconds field.
    pub pattern: String,
    /// The query text synthesized into the gateway request on fire.
    pub command: String,
    pub enabled: bool,
    /// When set, the schedule disables itself once `current_calls` reaches
    /// this limit.
    pub max_calls: Option<i64>,
    pub current_calls: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl Schedule {
    pub fn limit_reached(&self) -> bool {
        self.max_calls.is_some_and(|max| self.current_calls >= max)
    }
}
