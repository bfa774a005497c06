use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use memoh_core::config::DEFAULT_BIND_TTL_SECS;
use rusqlite::{params, Connection, TransactionBehavior};
use tracing::info;
use uuid::Uuid;

use crate::db::row_to_bind_code;
use crate::error::{IdentityError, Result};
use crate::identity::normalize_platform;
use crate::types::BindCode;

const TOKEN_LEN: usize = 8;
const TOKEN_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
/// Collisions on an 8-char token are vanishingly rare but the UNIQUE
/// constraint makes them observable; regenerate a bounded number of times.
const TOKEN_RETRIES: usize = 5;

const CODE_SELECT_SQL: &str =
    "SELECT id, token, issuer_user_id, platform, expires_at, used_at, used_by, created_at
     FROM channel_identity_bind_codes WHERE token = ?1";

/// Issues and consumes one-time bind codes.
///
/// Consume is the one compound write in the identity layer: it links the
/// channel identity to the code's issuer and marks the code used in a
/// single immediate transaction, so on any failure neither side changes.
pub struct BindService {
    db: Arc<Mutex<Connection>>,
}

impl BindService {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Create a bind code for `issuer_user_id`.
    ///
    /// `ttl_secs <= 0` falls back to the 24 h default. A non-empty platform
    /// restricts which identities may consume the code.
    pub fn issue(
        &self,
        issuer_user_id: &str,
        platform: Option<&str>,
        ttl_secs: i64,
    ) -> Result<BindCode> {
        if issuer_user_id.trim().is_empty() {
            return Err(IdentityError::InvalidInput("issuer must not be empty".into()));
        }

        let ttl = if ttl_secs > 0 { ttl_secs } else { DEFAULT_BIND_TTL_SECS };
        let platform = platform
            .map(normalize_platform)
            .filter(|p| !p.is_empty());

        let now = Utc::now();
        let expires_at = (now + Duration::seconds(ttl)).to_rfc3339();
        let created_at = now.to_rfc3339();

        let conn = self.db.lock().unwrap();
        let mut last_err = None;
        for _ in 0..TOKEN_RETRIES {
            let code = BindCode {
                id: Uuid::now_v7().to_string(),
                token: generate_token(),
                issuer_user_id: issuer_user_id.to_string(),
                platform: platform.clone(),
                expires_at: expires_at.clone(),
                used_at: None,
                used_by_identity_id: None,
                created_at: created_at.clone(),
            };
            match conn.execute(
                "INSERT INTO channel_identity_bind_codes
                    (id, token, issuer_user_id, platform, expires_at, used_at, used_by, created_at)
                 VALUES (?1,?2,?3,?4,?5,NULL,NULL,?6)",
                params![
                    code.id,
                    code.token,
                    code.issuer_user_id,
                    code.platform,
                    code.expires_at,
                    code.created_at,
                ],
            ) {
                Ok(_) => {
                    info!(issuer = %code.issuer_user_id, "bind code issued");
                    return Ok(code);
                }
                Err(rusqlite::Error::SqliteFailure(f, m))
                    if f.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    // Token collision — regenerate and try again.
                    last_err = Some(rusqlite::Error::SqliteFailure(f, m));
                }
                Err(e) => return Err(IdentityError::DatabaseError(e)),
            }
        }
        Err(IdentityError::DatabaseError(last_err.expect(
            "retry loop exits early unless a constraint violation was recorded",
        )))
    }

    /// Look a code up by its token (whitespace-trimmed).
    pub fn get(&self, token: &str) -> Result<BindCode> {
        let token = token.trim();
        if token.is_empty() {
            return Err(IdentityError::CodeNotFound);
        }
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(CODE_SELECT_SQL)?;
        match stmt.query_row(params![token], row_to_bind_code) {
            Ok(c) => Ok(c),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(IdentityError::CodeNotFound),
            Err(e) => Err(IdentityError::DatabaseError(e)),
        }
    }

    /// Atomically link + consume.
    ///
    /// `code` is the caller's snapshot (from `get`); the row is re-read and
    /// re-checked inside the transaction because another consume may have
    /// won the race since the snapshot was taken. Lock order is fixed —
    /// code row first, identity second — and on any error the transaction
    /// rolls back, leaving both the identity link and the code untouched.
    pub fn consume(&self, code: &BindCode, channel_identity_id: &str) -> Result<BindCode> {
        // Fast fail on the caller's snapshot before taking the write lock.
        let now = Utc::now().to_rfc3339();
        if code.is_used() {
            return Err(IdentityError::CodeUsed);
        }
        if code.is_expired_at(&now) {
            return Err(IdentityError::CodeExpired);
        }
        if code.token.trim().is_empty() {
            return Err(IdentityError::CodeNotFound);
        }
        let identity_id = channel_identity_id.trim();
        if identity_id.is_empty() || Uuid::parse_str(identity_id).is_err() {
            return Err(IdentityError::InvalidInput(
                "channel identity id must be a UUID".into(),
            ));
        }

        let mut conn = self.db.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Re-read the code under the write lock.
        let locked: BindCode = {
            let mut stmt = tx.prepare(CODE_SELECT_SQL)?;
            match stmt.query_row(params![code.token.trim()], row_to_bind_code) {
                Ok(c) => c,
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    return Err(IdentityError::CodeNotFound)
                }
                Err(e) => return Err(IdentityError::DatabaseError(e)),
            }
        };
        if locked.is_used() {
            return Err(IdentityError::CodeUsed);
        }
        if locked.is_expired_at(&now) {
            return Err(IdentityError::CodeExpired);
        }
        // Snapshot/locked platform divergence means the caller is operating
        // on stale state; treat like a platform mismatch.
        if let Some(snap_platform) = code.platform.as_deref() {
            if !snap_platform.is_empty()
                && !snap_platform.eq_ignore_ascii_case(locked.platform.as_deref().unwrap_or(""))
            {
                return Err(IdentityError::CodeMismatch);
            }
        }

        let identity = crate::identity::get_identity(&tx, identity_id)?
            .ok_or_else(|| IdentityError::NotFound(identity_id.to_string()))?;

        // Platform-scoped codes only bind identities on that platform.
        if let Some(code_platform) = locked.platform.as_deref() {
            if !code_platform.is_empty()
                && !code_platform.eq_ignore_ascii_case(&identity.platform)
            {
                return Err(IdentityError::CodeMismatch);
            }
        }

        match identity.user_id.as_deref() {
            Some(existing) if existing != locked.issuer_user_id => {
                // Never silently rewrite a link. Roll back; the code
                // stays unused.
                return Err(IdentityError::LinkConflict {
                    identity_id: identity.id,
                });
            }
            Some(_) => {} // already linked to the issuer; nothing to update
            None => {
                tx.execute(
                    "UPDATE channel_identities SET user_id = ?2, updated_at = ?3 WHERE id = ?1",
                    params![identity.id, locked.issuer_user_id, now],
                )?;
            }
        }

        // Guarded mark-used: zero rows means another transaction consumed
        // the code between our read and this write.
        let marked = tx.execute(
            "UPDATE channel_identity_bind_codes
             SET used_at = ?2, used_by = ?3
             WHERE token = ?1 AND used_at IS NULL",
            params![locked.token, now, identity.id],
        )?;
        if marked == 0 {
            return Err(IdentityError::CodeUsed);
        }

        tx.commit()?;
        info!(token = %locked.token, identity_id = %identity.id, "bind code consumed");

        Ok(BindCode {
            used_at: Some(now),
            used_by_identity_id: Some(identity.id),
            ..locked
        })
    }
}

/// 8 uppercase alphanumeric characters drawn from UUID entropy.
fn generate_token() -> String {
    let bytes = *Uuid::new_v4().as_bytes();
    bytes[..TOKEN_LEN]
        .iter()
        .map(|b| TOKEN_CHARSET[(*b as usize) % TOKEN_CHARSET.len()] as char)
        .collect()
}
