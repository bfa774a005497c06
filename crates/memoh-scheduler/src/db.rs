use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, SchedulerError};
use crate::types::Schedule;

pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schedules (
            id            TEXT PRIMARY KEY NOT NULL,
            bot_id        TEXT NOT NULL,
            name          TEXT NOT NULL,
            description   TEXT NOT NULL DEFAULT '',
            pattern       TEXT NOT NULL,
            command       TEXT NOT NULL,
            enabled       INTEGER NOT NULL DEFAULT 1,
            max_calls     INTEGER,
            current_calls INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_schedules_bot ON schedules (bot_id);",
    )
}

pub(crate) fn row_to_schedule(row: &rusqlite::Row<'_>) -> rusqlite::Result<Schedule> {
    Ok(Schedule {
        id: row.get(0)?,
        bot_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        pattern: row.get(4)?,
        command: row.get(5)?,
        enabled: row.get::<_, i32>(6)? != 0,
        max_calls: row.get(7)?,
        current_calls: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

const SCHEDULE_SELECT_SQL: &str =
    "SELECT id, bot_id, name, description, pattern, command, enabled,
            max_calls, current_calls, created_at, updated_at
     FROM schedules";

pub(crate) fn get_schedule(conn: &Connection, id: &str) -> Result<Option<Schedule>> {
    let row = conn
        .query_row(
            &format!("{SCHEDULE_SELECT_SQL} WHERE id = ?1"),
            params![id],
            row_to_schedule,
        )
        .optional()?;
    Ok(row)
}

pub(crate) fn list_enabled(conn: &Connection) -> Result<Vec<Schedule>> {
    let mut stmt = conn.prepare(&format!(
        "{SCHEDULE_SELECT_SQL} WHERE enabled = 1 ORDER BY created_at ASC"
    ))?;
    let rows = stmt
        .query_map([], row_to_schedule)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn list_for_bot(conn: &Connection, bot_id: &str) -> Result<Vec<Schedule>> {
    let mut stmt = conn.prepare(&format!(
        "{SCHEDULE_SELECT_SQL} WHERE bot_id = ?1 ORDER BY created_at ASC"
    ))?;
    let rows = stmt
        .query_map(params![bot_id], row_to_schedule)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Increment the call counter and disable the row in the same transaction
/// when the limit is hit. Returns the post-increment schedule so the caller
/// can see both the new counter and the possibly-cleared enabled flag.
pub(crate) fn increment_calls(conn: &mut Connection, id: &str) -> Result<Schedule> {
    let now = Utc::now().to_rfc3339();
    let tx = conn.transaction()?;

    let changed = tx.execute(
        "UPDATE schedules
         SET current_calls = current_calls + 1,
             enabled = CASE
                 WHEN max_calls IS NOT NULL AND current_calls + 1 >= max_calls THEN 0
                 ELSE enabled
             END,
             updated_at = ?2
         WHERE id = ?1",
        params![id, now],
    )?;
    if changed == 0 {
        return Err(SchedulerError::NotFound(id.to_string()));
    }

    let schedule = tx.query_row(
        &format!("{SCHEDULE_SELECT_SQL} WHERE id = ?1"),
        params![id],
        row_to_schedule,
    )?;
    tx.commit()?;
    Ok(schedule)
}
