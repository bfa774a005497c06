use std::str::FromStr;

use rusqlite::{Connection, Result};

use crate::types::{Conversation, ConversationKind, Message, Participant, ParticipantRole, Route};

/// Initialise conversation tables. Idempotent.
///
/// Deleting a bot cascades to conversations; deleting a conversation
/// cascades to routes, participants, presence and messages. The server
/// enables `PRAGMA foreign_keys` when it opens the connection.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id          TEXT PRIMARY KEY NOT NULL,
            bot_id      TEXT NOT NULL REFERENCES bots(id) ON DELETE CASCADE,
            kind        TEXT NOT NULL DEFAULT 'direct',
            parent_id   TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_bot ON conversations (bot_id);

        CREATE TABLE IF NOT EXISTS chat_participants (
            conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            participant_key TEXT NOT NULL,
            role            TEXT NOT NULL DEFAULT 'member',
            created_at      TEXT NOT NULL,
            PRIMARY KEY (conversation_id, participant_key)
        );

        CREATE TABLE IF NOT EXISTS chat_routes (
            id                       TEXT PRIMARY KEY NOT NULL,
            bot_id                   TEXT NOT NULL REFERENCES bots(id) ON DELETE CASCADE,
            platform                 TEXT NOT NULL,
            external_conversation_id TEXT NOT NULL,
            thread_id                TEXT NOT NULL DEFAULT '',
            conversation_id          TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            reply_target             TEXT NOT NULL DEFAULT '',
            created_at               TEXT NOT NULL,
            updated_at               TEXT NOT NULL,
            UNIQUE(bot_id, platform, external_conversation_id, thread_id)
        );

        CREATE TABLE IF NOT EXISTS chat_messages (
            id                  TEXT PRIMARY KEY NOT NULL,
            conversation_id     TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            bot_id              TEXT NOT NULL,
            route_id            TEXT,
            sender_identity_id  TEXT,
            sender_user_id      TEXT,
            platform            TEXT NOT NULL DEFAULT '',
            external_message_id TEXT,
            role                TEXT NOT NULL,
            content             TEXT NOT NULL DEFAULT 'null',  -- JSON
            metadata            TEXT NOT NULL DEFAULT '{}',    -- JSON
            created_at          TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_bot_created
            ON chat_messages (bot_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON chat_messages (conversation_id, created_at);

        CREATE TABLE IF NOT EXISTS chat_presence (
            conversation_id     TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            channel_identity_id TEXT NOT NULL,
            last_observed_at    TEXT NOT NULL,
            PRIMARY KEY (conversation_id, channel_identity_id)
        );",
    )
}

pub(crate) fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let kind = ConversationKind::from_str(&row.get::<_, String>(2)?).unwrap_or_default();
    Ok(Conversation {
        id: row.get(0)?,
        bot_id: row.get(1)?,
        kind,
        parent_id: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

pub(crate) fn row_to_participant(row: &rusqlite::Row<'_>) -> rusqlite::Result<Participant> {
    let role = ParticipantRole::from_str(&row.get::<_, String>(2)?).unwrap_or_default();
    Ok(Participant {
        conversation_id: row.get(0)?,
        participant_key: row.get(1)?,
        role,
        created_at: row.get(3)?,
    })
}

pub(crate) fn row_to_route(row: &rusqlite::Row<'_>) -> rusqlite::Result<Route> {
    Ok(Route {
        id: row.get(0)?,
        bot_id: row.get(1)?,
        platform: row.get(2)?,
        external_conversation_id: row.get(3)?,
        thread_id: row.get(4)?,
        conversation_id: row.get(5)?,
        reply_target: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

pub(crate) fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let content: serde_json::Value =
        serde_json::from_str(&row.get::<_, String>(9)?).unwrap_or(serde_json::Value::Null);
    let metadata: serde_json::Value =
        serde_json::from_str(&row.get::<_, String>(10)?).unwrap_or(serde_json::Value::Null);
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        bot_id: row.get(2)?,
        route_id: row.get(3)?,
        sender_identity_id: row.get(4)?,
        sender_user_id: row.get(5)?,
        platform: row.get(6)?,
        external_message_id: row.get(7)?,
        role: row.get(8)?,
        content,
        metadata,
        created_at: row.get(11)?,
    })
}
