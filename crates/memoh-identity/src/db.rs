use rusqlite::{Connection, Result};

use crate::types::{BindCode, ChannelIdentity};

/// Initialise identity tables. Idempotent; called on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_identities_table(conn)?;
    create_bind_codes_table(conn)?;
    Ok(())
}

pub(crate) fn row_to_identity(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChannelIdentity> {
    Ok(ChannelIdentity {
        id: row.get(0)?,
        platform: row.get(1)?,
        external_subject_id: row.get(2)?,
        user_id: row.get(3)?,
        display_name: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub(crate) fn row_to_bind_code(row: &rusqlite::Row<'_>) -> rusqlite::Result<BindCode> {
    Ok(BindCode {
        id: row.get(0)?,
        token: row.get(1)?,
        issuer_user_id: row.get(2)?,
        platform: row.get(3)?,
        expires_at: row.get(4)?,
        used_at: row.get(5)?,
        used_by_identity_id: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn create_identities_table(conn: &Connection) -> Result<()> {
    // UNIQUE(platform, external_subject_id) enforces one identity per
    // external account. idx speeds up the hot path: every inbound message
    // resolves (platform, subject) before anything else.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS channel_identities (
            id                  TEXT PRIMARY KEY NOT NULL,
            platform            TEXT NOT NULL,
            external_subject_id TEXT NOT NULL,
            user_id             TEXT,
            display_name        TEXT NOT NULL DEFAULT '',
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL,
            UNIQUE(platform, external_subject_id)
        );
        CREATE INDEX IF NOT EXISTS idx_identities_subject
            ON channel_identities (platform, external_subject_id);
        CREATE INDEX IF NOT EXISTS idx_identities_user
            ON channel_identities (user_id);",
    )
}

fn create_bind_codes_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS channel_identity_bind_codes (
            id              TEXT PRIMARY KEY NOT NULL,
            token           TEXT NOT NULL UNIQUE,
            issuer_user_id  TEXT NOT NULL,
            platform        TEXT,
            expires_at      TEXT NOT NULL,
            used_at         TEXT,
            used_by         TEXT,
            created_at      TEXT NOT NULL
        );",
    )
}
