use chrono::Utc;
use memoh_core::types::BotKind;
use rusqlite::{params, Connection};
use tracing::info;
use uuid::Uuid;

use crate::db::row_to_bot;
use crate::error::{Result, UserError};
use crate::types::Bot;

const BOT_SELECT_SQL: &str =
    "SELECT id, owner_user_id, name, kind, active, created_at, updated_at
     FROM bots WHERE id = ?1";

pub fn create_bot(conn: &Connection, owner_user_id: &str, name: &str, kind: BotKind) -> Result<Bot> {
    let owner = crate::users::get_user(conn, owner_user_id)?
        .ok_or_else(|| UserError::NotFound(owner_user_id.to_string()))?;

    let now = Utc::now().to_rfc3339();
    let bot = Bot {
        id: Uuid::now_v7().to_string(),
        owner_user_id: owner.id,
        name: name.to_string(),
        kind,
        active: true,
        created_at: now.clone(),
        updated_at: now,
    };
    conn.execute(
        "INSERT INTO bots (id, owner_user_id, name, kind, active, created_at, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7)",
        params![
            bot.id,
            bot.owner_user_id,
            bot.name,
            bot.kind.to_string(),
            bot.active as i32,
            bot.created_at,
            bot.updated_at,
        ],
    )?;
    info!(bot_id = %bot.id, owner = %bot.owner_user_id, "bot created");
    Ok(bot)
}

pub fn get_bot(conn: &Connection, bot_id: &str) -> Result<Option<Bot>> {
    let mut stmt = conn.prepare(BOT_SELECT_SQL)?;
    match stmt.query_row(params![bot_id], row_to_bot) {
        Ok(b) => Ok(Some(b)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(UserError::DatabaseError(e)),
    }
}

pub fn list_for_owner(conn: &Connection, owner_user_id: &str) -> Result<Vec<Bot>> {
    let mut stmt = conn.prepare(
        "SELECT id, owner_user_id, name, kind, active, created_at, updated_at
         FROM bots WHERE owner_user_id = ?1 ORDER BY created_at ASC",
    )?;
    let rows = stmt
        .query_map(params![owner_user_id], row_to_bot)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Delete a bot. Conversations, routes, participants, presence and messages
/// cascade at the SQL level (foreign keys), so callers only remove the root.
pub fn delete_bot(conn: &Connection, bot_id: &str) -> Result<()> {
    let rows = conn.execute("DELETE FROM bots WHERE id = ?1", params![bot_id])?;
    if rows == 0 {
        return Err(UserError::BotNotFound(bot_id.to_string()));
    }
    info!(bot_id, "bot deleted");
    Ok(())
}

pub fn set_active(conn: &Connection, bot_id: &str, active: bool) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let rows = conn.execute(
        "UPDATE bots SET active = ?2, updated_at = ?3 WHERE id = ?1",
        params![bot_id, active as i32, now],
    )?;
    if rows == 0 {
        return Err(UserError::BotNotFound(bot_id.to_string()));
    }
    Ok(())
}
