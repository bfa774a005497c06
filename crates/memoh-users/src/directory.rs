use std::sync::{Arc, Mutex};

use memoh_core::types::{BotKind, UserRole};
use rusqlite::Connection;

use crate::error::{Result, UserError};
use crate::types::{Bot, ChatSettings, ToolConnection, User};

/// Thread-safe facade over the user/bot directory tables.
///
/// Wraps a shared SQLite connection in a `Mutex`; every method takes the
/// lock for a single statement or a short statement sequence, so handlers
/// on different tasks never hold it across an await point.
pub struct Directory {
    db: Arc<Mutex<Connection>>,
}

impl Directory {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn create_user(&self, username: &str, password: &str, role: UserRole) -> Result<User> {
        let conn = self.db.lock().unwrap();
        crate::users::create_user(&conn, username, password, role)
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let conn = self.db.lock().unwrap();
        crate::users::get_user(&conn, user_id)
    }

    pub fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.db.lock().unwrap();
        crate::users::find_by_username(&conn, username)
    }

    pub fn verify_credentials(&self, username: &str, password: &str) -> Result<User> {
        let conn = self.db.lock().unwrap();
        crate::users::verify_credentials(&conn, username, password)
    }

    pub fn set_user_active(&self, user_id: &str, active: bool) -> Result<()> {
        let conn = self.db.lock().unwrap();
        crate::users::set_active(&conn, user_id, active)
    }

    pub fn create_bot(&self, owner_user_id: &str, name: &str, kind: BotKind) -> Result<Bot> {
        let conn = self.db.lock().unwrap();
        crate::bots::create_bot(&conn, owner_user_id, name, kind)
    }

    pub fn get_bot(&self, bot_id: &str) -> Result<Option<Bot>> {
        let conn = self.db.lock().unwrap();
        crate::bots::get_bot(&conn, bot_id)
    }

    pub fn list_bots_for_owner(&self, owner_user_id: &str) -> Result<Vec<Bot>> {
        let conn = self.db.lock().unwrap();
        crate::bots::list_for_owner(&conn, owner_user_id)
    }

    /// Remove a bot. With foreign keys on, conversations, routes,
    /// participants, presence and messages go with it.
    pub fn delete_bot(&self, bot_id: &str) -> Result<()> {
        let conn = self.db.lock().unwrap();
        crate::bots::delete_bot(&conn, bot_id)
    }

    pub fn set_bot_active(&self, bot_id: &str, active: bool) -> Result<()> {
        let conn = self.db.lock().unwrap();
        crate::bots::set_active(&conn, bot_id, active)
    }

    /// The user who owns a bot. `None` when the bot exists but its owner row
    /// was deactivated out from under it.
    pub fn bot_owner(&self, bot_id: &str) -> Result<Option<User>> {
        let conn = self.db.lock().unwrap();
        let bot = crate::bots::get_bot(&conn, bot_id)?
            .ok_or_else(|| UserError::BotNotFound(bot_id.to_string()))?;
        crate::users::get_user(&conn, &bot.owner_user_id)
    }

    /// Authorize `actor` against `bot`.
    ///
    /// Two distinct failures: the bot may not exist at all (`BotNotFound`),
    /// or it exists and the actor's role is insufficient
    /// (`PermissionDenied`). Owners and admins always pass; other active
    /// members pass only for shared bots when the route opts in via
    /// `allow_public_member`.
    pub fn authorize(
        &self,
        actor_user_id: &str,
        bot_id: &str,
        allow_public_member: bool,
    ) -> Result<Bot> {
        let conn = self.db.lock().unwrap();
        let bot = crate::bots::get_bot(&conn, bot_id)?
            .ok_or_else(|| UserError::BotNotFound(bot_id.to_string()))?;
        let actor = crate::users::get_user(&conn, actor_user_id)?
            .ok_or_else(|| UserError::NotFound(actor_user_id.to_string()))?;

        if !actor.active {
            return Err(UserError::PermissionDenied("account disabled".into()));
        }
        if actor.role.is_admin() || bot.owner_user_id == actor.id {
            return Ok(bot);
        }
        if bot.kind == BotKind::Shared && allow_public_member {
            return Ok(bot);
        }
        Err(UserError::PermissionDenied(format!(
            "user {} may not access bot {}",
            actor.id, bot.id
        )))
    }

    pub fn bot_settings(&self, bot_id: &str) -> Result<ChatSettings> {
        let conn = self.db.lock().unwrap();
        crate::settings::bot_settings(&conn, bot_id)
    }

    pub fn user_settings(&self, user_id: &str) -> Result<ChatSettings> {
        let conn = self.db.lock().unwrap();
        crate::settings::user_settings(&conn, user_id)
    }

    pub fn set_bot_settings(&self, bot_id: &str, s: &ChatSettings) -> Result<()> {
        let conn = self.db.lock().unwrap();
        crate::settings::set_bot_settings(&conn, bot_id, s)
    }

    pub fn set_user_settings(&self, user_id: &str, s: &ChatSettings) -> Result<()> {
        let conn = self.db.lock().unwrap();
        crate::settings::set_user_settings(&conn, user_id, s)
    }

    pub fn container_for_bot(&self, bot_id: &str) -> Result<Option<String>> {
        let conn = self.db.lock().unwrap();
        crate::settings::container_for_bot(&conn, bot_id)
    }

    pub fn set_container(&self, bot_id: &str, container_id: &str) -> Result<()> {
        let conn = self.db.lock().unwrap();
        crate::settings::set_container(&conn, bot_id, container_id)
    }

    pub fn active_tool_connections(&self, bot_id: &str) -> Result<Vec<ToolConnection>> {
        let conn = self.db.lock().unwrap();
        crate::settings::active_tool_connections(&conn, bot_id)
    }

    pub fn upsert_tool_connection(
        &self,
        bot_id: &str,
        name: &str,
        kind: &str,
        config: &serde_json::Value,
    ) -> Result<ToolConnection> {
        let conn = self.db.lock().unwrap();
        crate::settings::upsert_tool_connection(&conn, bot_id, name, kind, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn directory() -> Directory {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        Directory::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn authorize_distinguishes_unknown_bot_from_role() {
        let dir = directory();
        let owner = dir.create_user("owner", "pw", UserRole::Member).unwrap();
        let other = dir.create_user("other", "pw", UserRole::Member).unwrap();
        let bot = dir.create_bot(&owner.id, "helper", BotKind::Personal).unwrap();

        assert!(matches!(
            dir.authorize(&owner.id, "missing", false),
            Err(UserError::BotNotFound(_))
        ));
        assert!(matches!(
            dir.authorize(&other.id, &bot.id, false),
            Err(UserError::PermissionDenied(_))
        ));
        assert!(dir.authorize(&owner.id, &bot.id, false).is_ok());
    }

    #[test]
    fn shared_bot_honors_public_member_policy() {
        let dir = directory();
        let owner = dir.create_user("owner", "pw", UserRole::Member).unwrap();
        let member = dir.create_user("member", "pw", UserRole::Member).unwrap();
        let bot = dir.create_bot(&owner.id, "shared", BotKind::Shared).unwrap();

        assert!(dir.authorize(&member.id, &bot.id, true).is_ok());
        assert!(matches!(
            dir.authorize(&member.id, &bot.id, false),
            Err(UserError::PermissionDenied(_))
        ));
    }

    #[test]
    fn deactivated_users_lose_access_until_reactivated() {
        let dir = directory();
        let owner = dir.create_user("owner", "pw", UserRole::Member).unwrap();
        let bot = dir.create_bot(&owner.id, "helper", BotKind::Personal).unwrap();

        dir.set_user_active(&owner.id, false).unwrap();
        assert!(matches!(
            dir.authorize(&owner.id, &bot.id, false),
            Err(UserError::PermissionDenied(_))
        ));

        dir.set_user_active(&owner.id, true).unwrap();
        assert!(dir.authorize(&owner.id, &bot.id, false).is_ok());
    }

    #[test]
    fn bot_listing_and_deactivation_go_through_the_facade() {
        let dir = directory();
        let owner = dir.create_user("owner", "pw", UserRole::Member).unwrap();
        let bot = dir.create_bot(&owner.id, "helper", BotKind::Personal).unwrap();

        assert_eq!(dir.list_bots_for_owner(&owner.id).unwrap().len(), 1);

        dir.set_bot_active(&bot.id, false).unwrap();
        assert!(!dir.get_bot(&bot.id).unwrap().unwrap().active);

        dir.delete_bot(&bot.id).unwrap();
        assert!(dir.get_bot(&bot.id).unwrap().is_none());
        assert!(dir.list_bots_for_owner(&owner.id).unwrap().is_empty());
    }

    #[test]
    fn settings_levels_are_independent() {
        let dir = directory();
        let user = dir.create_user("u", "pw", UserRole::Member).unwrap();
        let bot = dir.create_bot(&user.id, "b", BotKind::Personal).unwrap();

        assert!(dir.bot_settings(&bot.id).unwrap().chat_model.is_none());

        dir.set_bot_settings(
            &bot.id,
            &ChatSettings {
                chat_model: Some("claude-sonnet-4".into()),
                provider: Some("anthropic".into()),
                ..Default::default()
            },
        )
        .unwrap();
        dir.set_user_settings(
            &user.id,
            &ChatSettings {
                chat_model: Some("gpt-4o".into()),
                provider: Some("openai".into()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(
            dir.bot_settings(&bot.id).unwrap().chat_model.as_deref(),
            Some("claude-sonnet-4")
        );
        assert_eq!(
            dir.user_settings(&user.id).unwrap().chat_model.as_deref(),
            Some("gpt-4o")
        );
    }
}
