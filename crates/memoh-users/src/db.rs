use std::str::FromStr;

use memoh_core::types::{BotKind, UserRole};
use rusqlite::{Connection, Result};

use crate::types::{Bot, ToolConnection, User};

/// Initialise all tables for the directory subsystem. Safe to call on every
/// startup — CREATE IF NOT EXISTS means it's idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_users_table(conn)?;
    create_bots_table(conn)?;
    create_settings_tables(conn)?;
    create_containers_table(conn)?;
    create_tool_connections_table(conn)?;
    Ok(())
}

pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let role = UserRole::from_str(&row.get::<_, String>(3)?).unwrap_or_default();
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        role,
        active: row.get::<_, i32>(4)? != 0,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub(crate) fn row_to_bot(row: &rusqlite::Row<'_>) -> rusqlite::Result<Bot> {
    let kind = BotKind::from_str(&row.get::<_, String>(3)?).unwrap_or_default();
    Ok(Bot {
        id: row.get(0)?,
        owner_user_id: row.get(1)?,
        name: row.get(2)?,
        kind,
        active: row.get::<_, i32>(4)? != 0,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub(crate) fn row_to_tool_connection(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<ToolConnection> {
    let config: serde_json::Value =
        serde_json::from_str(&row.get::<_, String>(4)?).unwrap_or(serde_json::Value::Null);
    Ok(ToolConnection {
        id: row.get(0)?,
        bot_id: row.get(1)?,
        name: row.get(2)?,
        kind: row.get(3)?,
        config,
        active: row.get::<_, i32>(5)? != 0,
        created_at: row.get(6)?,
    })
}

fn create_users_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY NOT NULL,
            username        TEXT NOT NULL UNIQUE,
            password_hash   TEXT NOT NULL,
            role            TEXT NOT NULL DEFAULT 'member',
            active          INTEGER NOT NULL DEFAULT 1,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );",
    )
}

fn create_bots_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS bots (
            id              TEXT PRIMARY KEY NOT NULL,
            owner_user_id   TEXT NOT NULL REFERENCES users(id),
            name            TEXT NOT NULL,
            kind            TEXT NOT NULL DEFAULT 'personal',
            active          INTEGER NOT NULL DEFAULT 1,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_bots_owner ON bots (owner_user_id);",
    )
}

fn create_settings_tables(conn: &Connection) -> Result<()> {
    // One row per bot/user; absent row means "no overrides at this level".
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS bot_settings (
            bot_id              TEXT PRIMARY KEY NOT NULL REFERENCES bots(id) ON DELETE CASCADE,
            chat_model          TEXT,
            provider            TEXT,
            api_key             TEXT,
            base_url            TEXT,
            max_context_minutes INTEGER,
            updated_at          TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS user_settings (
            user_id             TEXT PRIMARY KEY NOT NULL REFERENCES users(id),
            chat_model          TEXT,
            provider            TEXT,
            api_key             TEXT,
            base_url            TEXT,
            max_context_minutes INTEGER,
            updated_at          TEXT NOT NULL
        );",
    )
}

fn create_containers_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS containers (
            bot_id          TEXT PRIMARY KEY NOT NULL REFERENCES bots(id) ON DELETE CASCADE,
            container_id    TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );",
    )
}

fn create_tool_connections_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tool_connections (
            id              TEXT PRIMARY KEY NOT NULL,
            bot_id          TEXT NOT NULL REFERENCES bots(id) ON DELETE CASCADE,
            name            TEXT NOT NULL,
            kind            TEXT NOT NULL,
            config          TEXT NOT NULL DEFAULT '{}',  -- JSON
            active          INTEGER NOT NULL DEFAULT 1,
            created_at      TEXT NOT NULL,
            UNIQUE(bot_id, name)
        );",
    )
}
