//! Cron-driven schedule executor.
//!
//! Entries are loaded from the `schedules` table at boot into an in-memory
//! map; while the engine runs, that map is the single source of truth for
//! what fires. The persistent `enabled` flag only matters at boot and after
//! explicit update/delete. A racing update and fire resolve through the
//! update-side remove + re-add.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use memoh_chat::ChatResolver;
use memoh_core::config::SCHEDULE_TOKEN_TTL_SECS;
use memoh_protocol::ScheduleBlock;
use memoh_users::Directory;
use rusqlite::Connection;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db;
use crate::error::{Result, SchedulerError};
use crate::types::Schedule;

/// Mints short-lived bearer tokens for schedule fires. Implemented by the
/// server's token signer; the executor never sees signing material.
pub trait TokenMinter: Send + Sync {
    fn mint(&self, user_id: &str, ttl_secs: i64) -> std::result::Result<String, String>;
}

struct Entry {
    schedule: Schedule,
    cron: cron::Schedule,
    next_fire: Option<DateTime<Utc>>,
}

pub struct ScheduleExecutor {
    db: Arc<Mutex<Connection>>,
    directory: Arc<Directory>,
    resolver: Arc<ChatResolver>,
    minter: Arc<dyn TokenMinter>,
    /// id → live entry. One mutex for the whole map; fires run on spawned
    /// tasks and re-lock only for the brief drop-on-disable.
    entries: Mutex<HashMap<String, Entry>>,
}

impl ScheduleExecutor {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        directory: Arc<Directory>,
        resolver: Arc<ChatResolver>,
        minter: Arc<dyn TokenMinter>,
    ) -> Self {
        Self {
            db,
            directory,
            resolver,
            minter,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Load every enabled schedule into the entry map. Called once at boot.
    pub fn load(&self) -> Result<usize> {
        let schedules = {
            let conn = self.db.lock().unwrap();
            db::list_enabled(&conn)?
        };
        let mut entries = self.entries.lock().unwrap();
        let now = Utc::now();
        for schedule in schedules {
            match parse_pattern(&schedule.pattern) {
                Ok(cron) => {
                    let next_fire = cron.after(&now).next();
                    entries.insert(
                        schedule.id.clone(),
                        Entry {
                            schedule,
                            cron,
                            next_fire,
                        },
                    );
                }
                Err(e) => {
                    // A row with a bad pattern can only come from an older
                    // schema; skip it rather than refuse to boot.
                    error!(schedule_id = %schedule.id, error = %e, "unparseable schedule skipped");
                }
            }
        }
        info!(count = entries.len(), "schedules loaded");
        Ok(entries.len())
    }

    pub fn create(
        &self,
        bot_id: &str,
        name: &str,
        description: &str,
        pattern: &str,
        command: &str,
        max_calls: Option<i64>,
    ) -> Result<Schedule> {
        let cron = parse_pattern(pattern)?;
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let schedule = Schedule {
            id: Uuid::now_v7().to_string(),
            bot_id: bot_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            pattern: pattern.to_string(),
            command: command.to_string(),
            enabled: true,
            max_calls,
            current_calls: 0,
            created_at: now_str.clone(),
            updated_at: now_str,
        };

        {
            let conn = self.db.lock().unwrap();
            conn.execute(
                "INSERT INTO schedules
                    (id, bot_id, name, description, pattern, command, enabled,
                     max_calls, current_calls, created_at, updated_at)
                 VALUES (?1,?2,?3,?4,?5,?6,1,?7,0,?8,?8)",
                rusqlite::params![
                    schedule.id,
                    schedule.bot_id,
                    schedule.name,
                    schedule.description,
                    schedule.pattern,
                    schedule.command,
                    schedule.max_calls,
                    schedule.created_at,
                ],
            )?;
        }

        let next_fire = cron.after(&now).next();
        self.entries.lock().unwrap().insert(
            schedule.id.clone(),
            Entry {
                schedule: schedule.clone(),
                cron,
                next_fire,
            },
        );
        info!(schedule_id = %schedule.id, pattern = %schedule.pattern, "schedule created");
        Ok(schedule)
    }

    /// Re-parse, persist, then atomically replace the live entry
    /// (remove + re-add, so a concurrent fire sees either the old or the
    /// new entry, never a half-updated one).
    pub fn update(
        &self,
        id: &str,
        name: &str,
        description: &str,
        pattern: &str,
        command: &str,
        enabled: bool,
        max_calls: Option<i64>,
    ) -> Result<Schedule> {
        let cron = parse_pattern(pattern)?;
        let now = Utc::now();

        let updated = {
            let conn = self.db.lock().unwrap();
            let changed = conn.execute(
                "UPDATE schedules
                 SET name=?2, description=?3, pattern=?4, command=?5,
                     enabled=?6, max_calls=?7, updated_at=?8
                 WHERE id=?1",
                rusqlite::params![
                    id,
                    name,
                    description,
                    pattern,
                    command,
                    enabled as i32,
                    max_calls,
                    now.to_rfc3339(),
                ],
            )?;
            if changed == 0 {
                return Err(SchedulerError::NotFound(id.to_string()));
            }
            db::get_schedule(&conn, id)?.ok_or_else(|| SchedulerError::NotFound(id.to_string()))?
        };

        let mut entries = self.entries.lock().unwrap();
        entries.remove(id);
        if updated.enabled && !updated.limit_reached() {
            let next_fire = cron.after(&now).next();
            entries.insert(
                id.to_string(),
                Entry {
                    schedule: updated.clone(),
                    cron,
                    next_fire,
                },
            );
        }
        info!(schedule_id = %id, enabled = updated.enabled, "schedule updated");
        Ok(updated)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let changed = {
            let conn = self.db.lock().unwrap();
            conn.execute("DELETE FROM schedules WHERE id = ?1", rusqlite::params![id])?
        };
        if changed == 0 {
            return Err(SchedulerError::NotFound(id.to_string()));
        }
        self.entries.lock().unwrap().remove(id);
        info!(schedule_id = %id, "schedule deleted");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Schedule> {
        let conn = self.db.lock().unwrap();
        db::get_schedule(&conn, id)?.ok_or_else(|| SchedulerError::NotFound(id.to_string()))
    }

    pub fn list_for_bot(&self, bot_id: &str) -> Result<Vec<Schedule>> {
        let conn = self.db.lock().unwrap();
        db::list_for_bot(&conn, bot_id)
    }

    /// True while the entry is present in the live map (visible for tests
    /// and the admin surface).
    pub fn is_scheduled(&self, id: &str) -> bool {
        self.entries.lock().unwrap().contains_key(id)
    }

    /// Manual fire. Disabled (or exhausted) schedules refuse to run.
    pub async fn trigger(self: &Arc<Self>, id: &str) -> Result<()> {
        let schedule = self.get(id)?;
        if !schedule.enabled {
            return Err(SchedulerError::Disabled(id.to_string()));
        }
        self.run_schedule(schedule).await
    }

    /// Main loop. Ticks once per second until `shutdown` broadcasts `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("schedule executor started");
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick(),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("schedule executor shutting down");
                        break;
                    }
                }
            }
        }
    }

    // --- private helpers ---------------------------------------------------

    /// Fire every entry whose next_fire has arrived. Fires run on their own
    /// tasks so one slow gateway round cannot delay the rest.
    fn tick(self: &Arc<Self>) {
        let now = Utc::now();
        let due: Vec<Schedule> = {
            let mut entries = self.entries.lock().unwrap();
            let mut due = Vec::new();
            for entry in entries.values_mut() {
                let Some(next) = entry.next_fire else { continue };
                if next <= now {
                    entry.next_fire = entry.cron.after(&now).next();
                    due.push(entry.schedule.clone());
                }
            }
            due
        };

        for schedule in due {
            let executor = self.clone();
            tokio::spawn(async move {
                let id = schedule.id.clone();
                if let Err(e) = executor.run_schedule(schedule).await {
                    error!(schedule_id = %id, error = %e, "schedule fire failed");
                }
            });
        }
    }

    async fn run_schedule(&self, schedule: Schedule) -> Result<()> {
        let charged = self.charge_call(&schedule.id)?;

        let owner = self
            .directory
            .bot_owner(&schedule.bot_id)?
            .ok_or_else(|| SchedulerError::OwnerMissing(schedule.bot_id.clone()))?;
        let token = self
            .minter
            .mint(&owner.id, SCHEDULE_TOKEN_TTL_SECS)
            .map_err(SchedulerError::TokenMint)?;

        let block = ScheduleBlock {
            id: charged.id.clone(),
            name: charged.name.clone(),
            description: charged.description.clone(),
            pattern: charged.pattern.clone(),
            max_calls: charged.max_calls,
            command: charged.command.clone(),
        };
        self.resolver
            .trigger_schedule(&charged.bot_id, block, &token)
            .await?;
        info!(schedule_id = %charged.id, calls = charged.current_calls, "schedule fired");
        Ok(())
    }

    /// Count the fire. When the storage layer reports the limit hit
    /// (enabled flips off), drop the live entry; the fire that hit the
    /// limit still runs.
    fn charge_call(&self, id: &str) -> Result<Schedule> {
        let charged = {
            let mut conn = self.db.lock().unwrap();
            db::increment_calls(&mut conn, id)?
        };
        if !charged.enabled {
            self.entries.lock().unwrap().remove(id);
            warn!(schedule_id = %id, calls = charged.current_calls, "call limit reached; schedule disabled");
        }
        Ok(charged)
    }
}

/// Parse a cron pattern, accepting an optional seconds field: five-field
/// patterns get `0` seconds prepended, six- and seven-field patterns pass
/// through.
fn parse_pattern(pattern: &str) -> Result<cron::Schedule> {
    let fields = pattern.split_whitespace().count();
    let expr = match fields {
        5 => format!("0 {}", pattern.trim()),
        6 | 7 => pattern.trim().to_string(),
        _ => {
            return Err(SchedulerError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: format!("expected 5-7 fields, got {fields}"),
            })
        }
    };
    cron::Schedule::from_str(&expr).map_err(|e| SchedulerError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoh_agent::GatewayClient;
    use memoh_chat::{NoopMemory, SkillLoader};
    use memoh_core::types::{BotKind, UserRole};
    use memoh_history::HistoryStore;
    use memoh_protocol::UsableSkill;

    struct NoSkills;

    impl SkillLoader for NoSkills {
        fn load_usable(
            &self,
            _names: &[String],
        ) -> std::result::Result<Vec<UsableSkill>, memoh_chat::skills::SkillError> {
            Ok(Vec::new())
        }
    }

    struct StaticMinter;

    impl TokenMinter for StaticMinter {
        fn mint(&self, _user_id: &str, _ttl_secs: i64) -> std::result::Result<String, String> {
            Ok("token".to_string())
        }
    }

    fn executor() -> (Arc<ScheduleExecutor>, String) {
        let conn = Connection::open_in_memory().unwrap();
        memoh_users::db::init_db(&conn).unwrap();
        memoh_history::db::init_db(&conn).unwrap();
        db::init_db(&conn).unwrap();
        let db = Arc::new(Mutex::new(conn));

        let directory = Arc::new(Directory::new(db.clone()));
        let owner = directory.create_user("owner", "pw", UserRole::Member).unwrap();
        let bot = directory.create_bot(&owner.id, "bot", BotKind::Personal).unwrap();

        let gateway = Arc::new(
            GatewayClient::new("http://127.0.0.1:9", std::time::Duration::from_secs(1)).unwrap(),
        );
        let resolver = Arc::new(ChatResolver::new(
            directory.clone(),
            Arc::new(HistoryStore::new(db.clone())),
            gateway,
            Arc::new(NoSkills),
            Arc::new(NoopMemory),
        ));
        let executor = Arc::new(ScheduleExecutor::new(
            db,
            directory,
            resolver,
            Arc::new(StaticMinter),
        ));
        (executor, bot.id)
    }

    #[test]
    fn five_field_patterns_get_implicit_seconds() {
        assert!(parse_pattern("*/5 * * * *").is_ok());
        assert!(parse_pattern("0 */5 * * * *").is_ok());
        assert!(matches!(
            parse_pattern("not a cron"),
            Err(SchedulerError::InvalidPattern { .. })
        ));
        assert!(matches!(
            parse_pattern("61 * * * *"),
            Err(SchedulerError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn create_rejects_bad_patterns_and_registers_good_ones() {
        let (executor, bot_id) = executor();
        assert!(matches!(
            executor.create(&bot_id, "bad", "", "nope", "cmd", None),
            Err(SchedulerError::InvalidPattern { .. })
        ));

        let schedule = executor
            .create(&bot_id, "digest", "", "0 9 * * *", "summarize", None)
            .unwrap();
        assert!(executor.is_scheduled(&schedule.id));
    }

    #[test]
    fn update_disabling_removes_live_entry() {
        let (executor, bot_id) = executor();
        let schedule = executor
            .create(&bot_id, "digest", "", "0 9 * * *", "summarize", None)
            .unwrap();

        executor
            .update(&schedule.id, "digest", "", "0 9 * * *", "summarize", false, None)
            .unwrap();
        assert!(!executor.is_scheduled(&schedule.id));

        executor
            .update(&schedule.id, "digest", "", "0 9 * * *", "summarize", true, None)
            .unwrap();
        assert!(executor.is_scheduled(&schedule.id));
    }

    #[tokio::test]
    async fn charge_call_disables_at_limit_and_drops_entry() {
        let (executor, bot_id) = executor();
        let schedule = executor
            .create(&bot_id, "twice", "", "0 * * * *", "cmd", Some(2))
            .unwrap();

        let first = executor.charge_call(&schedule.id).unwrap();
        assert_eq!(first.current_calls, 1);
        assert!(first.enabled);
        assert!(executor.is_scheduled(&schedule.id));

        let second = executor.charge_call(&schedule.id).unwrap();
        assert_eq!(second.current_calls, 2);
        assert!(!second.enabled);
        assert!(!executor.is_scheduled(&schedule.id));

        // Exhausted schedules refuse manual fires too.
        assert!(matches!(
            executor.trigger(&schedule.id).await,
            Err(SchedulerError::Disabled(_))
        ));
    }

    #[tokio::test]
    async fn trigger_on_disabled_schedule_is_refused() {
        let (executor, bot_id) = executor();
        let schedule = executor
            .create(&bot_id, "digest", "", "0 9 * * *", "summarize", None)
            .unwrap();
        executor
            .update(&schedule.id, "digest", "", "0 9 * * *", "summarize", false, None)
            .unwrap();

        assert!(matches!(
            executor.trigger(&schedule.id).await,
            Err(SchedulerError::Disabled(_))
        ));
    }
}
