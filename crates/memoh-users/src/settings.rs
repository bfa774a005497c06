use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::row_to_tool_connection;
use crate::error::{Result, UserError};
use crate::types::{ChatSettings, ToolConnection};

fn row_to_settings(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatSettings> {
    Ok(ChatSettings {
        chat_model: row.get(0)?,
        provider: row.get(1)?,
        api_key: row.get(2)?,
        base_url: row.get(3)?,
        max_context_minutes: row.get(4)?,
    })
}

/// Bot-level chat settings, or the empty default when none are stored.
pub fn bot_settings(conn: &Connection, bot_id: &str) -> Result<ChatSettings> {
    let row = conn
        .query_row(
            "SELECT chat_model, provider, api_key, base_url, max_context_minutes
             FROM bot_settings WHERE bot_id = ?1",
            params![bot_id],
            row_to_settings,
        )
        .optional()?;
    Ok(row.unwrap_or_default())
}

pub fn user_settings(conn: &Connection, user_id: &str) -> Result<ChatSettings> {
    let row = conn
        .query_row(
            "SELECT chat_model, provider, api_key, base_url, max_context_minutes
             FROM user_settings WHERE user_id = ?1",
            params![user_id],
            row_to_settings,
        )
        .optional()?;
    Ok(row.unwrap_or_default())
}

pub fn set_bot_settings(conn: &Connection, bot_id: &str, s: &ChatSettings) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO bot_settings
            (bot_id, chat_model, provider, api_key, base_url, max_context_minutes, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7)
         ON CONFLICT(bot_id) DO UPDATE SET
            chat_model=?2, provider=?3, api_key=?4, base_url=?5,
            max_context_minutes=?6, updated_at=?7",
        params![
            bot_id,
            s.chat_model,
            s.provider,
            s.api_key,
            s.base_url,
            s.max_context_minutes,
            now,
        ],
    )?;
    Ok(())
}

pub fn set_user_settings(conn: &Connection, user_id: &str, s: &ChatSettings) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO user_settings
            (user_id, chat_model, provider, api_key, base_url, max_context_minutes, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7)
         ON CONFLICT(user_id) DO UPDATE SET
            chat_model=?2, provider=?3, api_key=?4, base_url=?5,
            max_context_minutes=?6, updated_at=?7",
        params![
            user_id,
            s.chat_model,
            s.provider,
            s.api_key,
            s.base_url,
            s.max_context_minutes,
            now,
        ],
    )?;
    Ok(())
}

/// The tool-host container bound to a bot, if one has been registered.
/// The resolver falls back to its own naming convention when this is absent.
pub fn container_for_bot(conn: &Connection, bot_id: &str) -> Result<Option<String>> {
    let row = conn
        .query_row(
            "SELECT container_id FROM containers WHERE bot_id = ?1",
            params![bot_id],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(row)
}

pub fn set_container(conn: &Connection, bot_id: &str, container_id: &str) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO containers (bot_id, container_id, created_at)
         VALUES (?1,?2,?3)
         ON CONFLICT(bot_id) DO UPDATE SET container_id=?2",
        params![bot_id, container_id, now],
    )?;
    Ok(())
}

/// Active tool connections for a bot, in registration order. These become
/// the envelope's mcpConnections block.
pub fn active_tool_connections(conn: &Connection, bot_id: &str) -> Result<Vec<ToolConnection>> {
    let mut stmt = conn.prepare(
        "SELECT id, bot_id, name, kind, config, active, created_at
         FROM tool_connections
         WHERE bot_id = ?1 AND active = 1
         ORDER BY created_at ASC",
    )?;
    let rows = stmt
        .query_map(params![bot_id], row_to_tool_connection)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn upsert_tool_connection(
    conn: &Connection,
    bot_id: &str,
    name: &str,
    kind: &str,
    config: &serde_json::Value,
) -> Result<ToolConnection> {
    let config_json = serde_json::to_string(config)
        .map_err(|e| UserError::InvalidInput(format!("bad tool config: {e}")))?;
    let now = Utc::now().to_rfc3339();
    let id = Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO tool_connections (id, bot_id, name, kind, config, active, created_at)
         VALUES (?1,?2,?3,?4,?5,1,?6)
         ON CONFLICT(bot_id, name) DO UPDATE SET kind=?4, config=?5, active=1",
        params![id, bot_id, name, kind, config_json, now],
    )?;

    let row = conn.query_row(
        "SELECT id, bot_id, name, kind, config, active, created_at
         FROM tool_connections WHERE bot_id = ?1 AND name = ?2",
        params![bot_id, name],
        row_to_tool_connection,
    )?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use serde_json::json;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO users (id, username, password_hash, role, active, created_at, updated_at)
             VALUES ('user-1', 'user-1', 'x', 'member', 1, ?1, ?1)",
            [&now],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO bots (id, owner_user_id, name, kind, active, created_at, updated_at)
             VALUES ('bot-1', 'user-1', 'bot-1', 'personal', 1, ?1, ?1)",
            [&now],
        )
        .unwrap();
        conn
    }

    #[test]
    fn absent_settings_rows_read_as_defaults() {
        let conn = test_conn();
        assert!(bot_settings(&conn, "bot-1").unwrap().chat_model.is_none());
        assert!(user_settings(&conn, "user-1").unwrap().provider.is_none());
    }

    #[test]
    fn settings_upsert_overwrites_in_place() {
        let conn = test_conn();
        set_bot_settings(
            &conn,
            "bot-1",
            &ChatSettings {
                chat_model: Some("claude-sonnet-4".into()),
                provider: Some("anthropic".into()),
                ..Default::default()
            },
        )
        .unwrap();
        set_bot_settings(
            &conn,
            "bot-1",
            &ChatSettings {
                chat_model: Some("claude-opus-4".into()),
                provider: Some("anthropic".into()),
                max_context_minutes: Some(-1),
                ..Default::default()
            },
        )
        .unwrap();

        let settings = bot_settings(&conn, "bot-1").unwrap();
        assert_eq!(settings.chat_model.as_deref(), Some("claude-opus-4"));
        assert_eq!(settings.max_context_minutes, Some(-1));
    }

    #[test]
    fn container_binding_round_trips() {
        let conn = test_conn();
        assert!(container_for_bot(&conn, "bot-1").unwrap().is_none());

        set_container(&conn, "bot-1", "mcp-custom").unwrap();
        assert_eq!(
            container_for_bot(&conn, "bot-1").unwrap().as_deref(),
            Some("mcp-custom")
        );

        // Re-binding replaces, not duplicates.
        set_container(&conn, "bot-1", "mcp-other").unwrap();
        assert_eq!(
            container_for_bot(&conn, "bot-1").unwrap().as_deref(),
            Some("mcp-other")
        );
    }

    #[test]
    fn tool_connection_upsert_updates_by_name() {
        let conn = test_conn();
        let first =
            upsert_tool_connection(&conn, "bot-1", "files", "stdio", &json!({"cmd": "fs"}))
                .unwrap();
        assert!(first.active);

        let second =
            upsert_tool_connection(&conn, "bot-1", "files", "sse", &json!({"url": "http://x"}))
                .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.kind, "sse");
        assert_eq!(second.config, json!({"url": "http://x"}));

        let active = active_tool_connections(&conn, "bot-1").unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "files");
    }
}
