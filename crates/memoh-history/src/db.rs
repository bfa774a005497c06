use rusqlite::{Connection, Result};

use crate::types::HistoryRecord;

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS history_records (
            id          TEXT PRIMARY KEY NOT NULL,
            bot_id      TEXT NOT NULL,
            session     TEXT NOT NULL,
            messages    TEXT NOT NULL DEFAULT '[]',  -- JSON array
            skills      TEXT NOT NULL DEFAULT '[]',  -- JSON array
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_history_window
            ON history_records (bot_id, session, created_at);",
    )
}

pub(crate) fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryRecord> {
    let messages: Vec<serde_json::Value> =
        serde_json::from_str(&row.get::<_, String>(3)?).unwrap_or_default();
    let skills: Vec<String> =
        serde_json::from_str(&row.get::<_, String>(4)?).unwrap_or_default();
    Ok(HistoryRecord {
        id: row.get(0)?,
        bot_id: row.get(1)?,
        session: row.get(2)?,
        messages,
        skills,
        created_at: row.get(5)?,
    })
}
