use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use memoh_core::types::UserRole;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::row_to_user;
use crate::error::{Result, UserError};
use crate::types::User;

const USER_SELECT_SQL: &str =
    "SELECT id, username, password_hash, role, active, created_at, updated_at
     FROM users WHERE id = ?1";

/// Insert a brand-new user row. The password is hashed here so callers never
/// handle the PHC string themselves.
pub fn create_user(
    conn: &Connection,
    username: &str,
    password: &str,
    role: UserRole,
) -> Result<User> {
    let username = username.trim();
    if username.is_empty() {
        return Err(UserError::InvalidInput("username must not be empty".into()));
    }

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| UserError::PasswordHash(e.to_string()))?
        .to_string();

    let now = Utc::now().to_rfc3339();
    let user = User {
        id: Uuid::now_v7().to_string(),
        username: username.to_string(),
        password_hash: hash,
        role,
        active: true,
        created_at: now.clone(),
        updated_at: now,
    };

    conn.execute(
        "INSERT INTO users (id, username, password_hash, role, active, created_at, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7)",
        params![
            user.id,
            user.username,
            user.password_hash,
            user.role.to_string(),
            user.active as i32,
            user.created_at,
            user.updated_at,
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            UserError::AlreadyExists(user.username.clone())
        }
        other => UserError::DatabaseError(other),
    })?;

    Ok(user)
}

/// Load a user by primary key. Returns None instead of an error when absent
/// so callers decide whether missing is exceptional in their context.
pub fn get_user(conn: &Connection, user_id: &str) -> Result<Option<User>> {
    let mut stmt = conn.prepare(USER_SELECT_SQL)?;
    match stmt.query_row(params![user_id], row_to_user) {
        Ok(u) => Ok(Some(u)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(UserError::DatabaseError(e)),
    }
}

pub fn find_by_username(conn: &Connection, username: &str) -> Result<Option<User>> {
    let mut stmt = conn.prepare(
        "SELECT id, username, password_hash, role, active, created_at, updated_at
         FROM users WHERE username = ?1",
    )?;
    match stmt.query_row(params![username], row_to_user) {
        Ok(u) => Ok(Some(u)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(UserError::DatabaseError(e)),
    }
}

/// Constant-shape credential check. Returns the user only when the password
/// verifies and the account is active.
pub fn verify_credentials(conn: &Connection, username: &str, password: &str) -> Result<User> {
    let user = find_by_username(conn, username)?
        .ok_or_else(|| UserError::NotFound(username.to_string()))?;

    let parsed = PasswordHash::new(&user.password_hash)
        .map_err(|e| UserError::PasswordHash(e.to_string()))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| UserError::PermissionDenied("invalid credentials".into()))?;

    if !user.active {
        return Err(UserError::PermissionDenied("account disabled".into()));
    }
    Ok(user)
}

pub fn set_active(conn: &Connection, user_id: &str, active: bool) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let rows = conn.execute(
        "UPDATE users SET active = ?2, updated_at = ?3 WHERE id = ?1",
        params![user_id, active as i32, now],
    )?;
    if rows == 0 {
        return Err(UserError::NotFound(user_id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        conn
    }

    #[test]
    fn create_and_verify() {
        let conn = test_conn();
        let user = create_user(&conn, "alice", "hunter2", UserRole::Member).unwrap();
        assert!(user.password_hash.starts_with("$argon2"));

        let ok = verify_credentials(&conn, "alice", "hunter2").unwrap();
        assert_eq!(ok.id, user.id);

        let err = verify_credentials(&conn, "alice", "wrong");
        assert!(matches!(err, Err(UserError::PermissionDenied(_))));
    }

    #[test]
    fn duplicate_username_rejected() {
        let conn = test_conn();
        create_user(&conn, "bob", "pw", UserRole::Member).unwrap();
        let err = create_user(&conn, "bob", "pw2", UserRole::Member);
        assert!(matches!(err, Err(UserError::AlreadyExists(_))));
    }
}
