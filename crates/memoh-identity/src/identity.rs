use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::info;
use uuid::Uuid;

use crate::db::row_to_identity;
use crate::error::{IdentityError, Result};
use crate::types::ChannelIdentity;

const IDENTITY_SELECT_SQL: &str =
    "SELECT id, platform, external_subject_id, user_id, display_name, created_at, updated_at
     FROM channel_identities WHERE id = ?1";

/// Thread-safe store of channel identities.
pub struct IdentityService {
    db: Arc<Mutex<Connection>>,
}

impl IdentityService {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Resolve a (platform, external subject) pair to its identity row,
    /// creating it on first sighting. Hot path: called on every inbound
    /// message.
    ///
    /// INSERT OR IGNORE + read-back handles the race where two messages
    /// from the same new sender arrive simultaneously — the UNIQUE
    /// constraint picks one winner and both calls return the same row.
    pub fn get_or_create(
        &self,
        platform: &str,
        external_subject_id: &str,
        display_name: &str,
    ) -> Result<ChannelIdentity> {
        let platform = normalize_platform(platform);
        let subject = external_subject_id.trim();
        if platform.is_empty() || subject.is_empty() {
            return Err(IdentityError::InvalidInput(
                "platform and subject id must not be empty".into(),
            ));
        }

        let now = Utc::now().to_rfc3339();
        let id = Uuid::now_v7().to_string();
        let conn = self.db.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO channel_identities
                (id, platform, external_subject_id, user_id, display_name, created_at, updated_at)
             VALUES (?1,?2,?3,NULL,?4,?5,?5)",
            params![id, platform, subject, display_name, now],
        )?;
        if inserted > 0 {
            info!(%platform, subject, "channel identity created");
        }

        let identity = conn.query_row(
            "SELECT id, platform, external_subject_id, user_id, display_name,
                    created_at, updated_at
             FROM channel_identities
             WHERE platform = ?1 AND external_subject_id = ?2",
            params![platform, subject],
            row_to_identity,
        )?;

        // Opportunistic display-name refresh; first sighting often has no
        // name and a later message does.
        if !display_name.is_empty() && identity.display_name != display_name {
            conn.execute(
                "UPDATE channel_identities SET display_name = ?2, updated_at = ?3 WHERE id = ?1",
                params![identity.id, display_name, Utc::now().to_rfc3339()],
            )?;
        }

        Ok(identity)
    }

    pub fn get(&self, identity_id: &str) -> Result<Option<ChannelIdentity>> {
        let conn = self.db.lock().unwrap();
        get_identity(&conn, identity_id)
    }

    pub fn find_by_subject(
        &self,
        platform: &str,
        external_subject_id: &str,
    ) -> Result<Option<ChannelIdentity>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, platform, external_subject_id, user_id, display_name,
                    created_at, updated_at
             FROM channel_identities
             WHERE platform = ?1 AND external_subject_id = ?2",
        )?;
        match stmt.query_row(
            params![normalize_platform(platform), external_subject_id.trim()],
            row_to_identity,
        ) {
            Ok(i) => Ok(Some(i)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(IdentityError::DatabaseError(e)),
        }
    }

    /// All identities linked to one internal user, across platforms.
    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<ChannelIdentity>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, platform, external_subject_id, user_id, display_name,
                    created_at, updated_at
             FROM channel_identities
             WHERE user_id = ?1
             ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![user_id], row_to_identity)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Link an identity to a user. Set-at-most-once: linking to the user it
    /// already points at is a no-op; linking to anyone else is a conflict.
    pub fn link_to_user(&self, identity_id: &str, user_id: &str) -> Result<ChannelIdentity> {
        let conn = self.db.lock().unwrap();
        let identity = get_identity(&conn, identity_id)?
            .ok_or_else(|| IdentityError::NotFound(identity_id.to_string()))?;

        match identity.user_id.as_deref() {
            Some(existing) if existing == user_id => return Ok(identity),
            Some(_) => {
                return Err(IdentityError::LinkConflict {
                    identity_id: identity.id,
                })
            }
            None => {}
        }

        conn.execute(
            "UPDATE channel_identities SET user_id = ?2, updated_at = ?3 WHERE id = ?1",
            params![identity_id, user_id, Utc::now().to_rfc3339()],
        )?;
        info!(identity_id, user_id, "channel identity linked");

        let linked = get_identity(&conn, identity_id)?
            .ok_or_else(|| IdentityError::NotFound(identity_id.to_string()))?;
        Ok(linked)
    }
}

pub(crate) fn get_identity(conn: &Connection, identity_id: &str) -> Result<Option<ChannelIdentity>> {
    let mut stmt = conn.prepare(IDENTITY_SELECT_SQL)?;
    match stmt.query_row(params![identity_id], row_to_identity) {
        Ok(i) => Ok(Some(i)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(IdentityError::DatabaseError(e)),
    }
}

pub(crate) fn normalize_platform(platform: &str) -> String {
    platform.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn service() -> IdentityService {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        IdentityService::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn get_or_create_is_idempotent_per_subject() {
        let svc = service();
        let a = svc.get_or_create("Feishu", "ou_123", "Ada").unwrap();
        let b = svc.get_or_create("feishu", "ou_123", "Ada").unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.platform, "feishu");
    }

    #[test]
    fn link_is_set_at_most_once() {
        let svc = service();
        let ci = svc.get_or_create("telegram", "42", "Bob").unwrap();

        svc.link_to_user(&ci.id, "user-1").unwrap();
        // Re-linking to the same user is a no-op.
        svc.link_to_user(&ci.id, "user-1").unwrap();

        let err = svc.link_to_user(&ci.id, "user-2");
        assert!(matches!(err, Err(IdentityError::LinkConflict { .. })));

        let after = svc.get(&ci.id).unwrap().unwrap();
        assert_eq!(after.user_id.as_deref(), Some("user-1"));
    }
}
