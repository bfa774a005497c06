use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::debug;
use uuid::Uuid;

use crate::db::row_to_record;
use crate::error::{HistoryError, Result};
use crate::types::HistoryRecord;

/// Append-only store of completed rounds.
pub struct HistoryStore {
    db: Arc<Mutex<Connection>>,
}

impl HistoryStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Append one round. Exactly one record per successful round — the
    /// resolver owns that contract; this method never dedupes.
    pub fn append(
        &self,
        bot_id: &str,
        session: &str,
        messages: &[serde_json::Value],
        skills: &[String],
    ) -> Result<HistoryRecord> {
        if bot_id.is_empty() || session.is_empty() {
            return Err(HistoryError::InvalidInput(
                "bot id and session must not be empty".into(),
            ));
        }

        let record = HistoryRecord {
            id: Uuid::now_v7().to_string(),
            bot_id: bot_id.to_string(),
            session: session.to_string(),
            messages: messages.to_vec(),
            skills: skills.to_vec(),
            created_at: Utc::now().to_rfc3339(),
        };
        let messages_json = serde_json::to_string(&record.messages)?;
        let skills_json = serde_json::to_string(&record.skills)?;

        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO history_records (id, bot_id, session, messages, skills, created_at)
             VALUES (?1,?2,?3,?4,?5,?6)",
            params![
                record.id,
                record.bot_id,
                record.session,
                messages_json,
                skills_json,
                record.created_at,
            ],
        )?;
        debug!(bot_id, session, messages = record.messages.len(), "round appended");
        Ok(record)
    }

    /// Records for (bot, session) created at or after `since`, ascending.
    /// `since = None` returns the full session history.
    pub fn window(
        &self,
        bot_id: &str,
        session: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<HistoryRecord>> {
        let since_str = since.map(|t| t.to_rfc3339()).unwrap_or_default();
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, bot_id, session, messages, skills, created_at
             FROM history_records
             WHERE bot_id = ?1 AND session = ?2 AND created_at >= ?3
             ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![bot_id, session, since_str], row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
