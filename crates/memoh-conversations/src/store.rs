use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{row_to_conversation, row_to_message, row_to_participant, row_to_route};
use crate::error::{ConversationError, Result};
use crate::types::{
    AccessMode, Conversation, ConversationKind, ConversationListing, Message, NewMessage,
    Participant, ParticipantRole, ReadAccess, ResolveChatArgs, ResolvedRoute, Route,
};

const ROUTE_SELECT_SQL: &str =
    "SELECT id, bot_id, platform, external_conversation_id, thread_id, conversation_id,
            reply_target, created_at, updated_at
     FROM chat_routes
     WHERE bot_id = ?1 AND platform = ?2 AND external_conversation_id = ?3 AND thread_id = ?4";

/// Bot-scoped conversation/message store: routes, participants, messages and
/// the presence cache that powers observed-through-channel-identity reads.
pub struct ConversationStore {
    db: Arc<Mutex<Connection>>,
}

impl ConversationStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let conn = self.db.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, bot_id, kind, parent_id, created_at, updated_at
                 FROM conversations WHERE id = ?1",
                params![conversation_id],
                row_to_conversation,
            )
            .optional()?;
        Ok(row)
    }

    /// Map one inbound (platform, conversation, thread) tuple to an internal
    /// conversation, creating the conversation/route pair on first contact.
    ///
    /// The fast path (route exists) also keeps the world current: it ensures
    /// the sender is a participant, refreshes a drifted reply target and
    /// bumps the conversation's updated_at. Both side-writes are
    /// warn-and-continue — losing them never loses the message.
    pub fn resolve_chat(&self, args: &ResolveChatArgs<'_>) -> Result<ResolvedRoute> {
        if args.bot_id.is_empty() || args.platform.is_empty() {
            return Err(ConversationError::InvalidInput(
                "bot id and platform must not be empty".into(),
            ));
        }

        let conn = self.db.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        if let Some(route) = find_route(
            &conn,
            args.bot_id,
            args.platform,
            args.external_conversation_id,
            args.thread_id,
        )? {
            if let Err(e) = ensure_participant(
                &conn,
                &route.conversation_id,
                args.channel_identity_id,
                ParticipantRole::Member,
            ) {
                warn!(error = %e, conversation_id = %route.conversation_id,
                      "participant ensure failed; continuing");
            }
            if !args.reply_target.is_empty() && args.reply_target != route.reply_target {
                if let Err(e) = conn.execute(
                    "UPDATE chat_routes SET reply_target = ?2, updated_at = ?3 WHERE id = ?1",
                    params![route.id, args.reply_target, now],
                ) {
                    warn!(error = %e, route_id = %route.id, "reply target update failed");
                }
            }
            conn.execute(
                "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
                params![route.conversation_id, now],
            )?;
            return Ok(ResolvedRoute {
                conversation_id: route.conversation_id,
                route_id: route.id,
                created: false,
            });
        }

        // No route yet — derive what kind of conversation this message opens.
        let kind = if !args.thread_id.is_empty() {
            ConversationKind::Thread
        } else if matches!(args.conversation_type, "" | "p2p" | "private") {
            ConversationKind::Direct
        } else {
            ConversationKind::Group
        };

        // Group conversations are owned by the bot's owner user so they
        // survive the first sender unlinking; direct/thread conversations
        // are keyed by the sender's channel identity.
        let creator_key = match kind {
            ConversationKind::Group => args.bot_owner_user_id,
            _ => args.channel_identity_id,
        };

        // A thread hangs off the conversation its non-thread route points at.
        let parent_id = if kind == ConversationKind::Thread {
            find_route(
                &conn,
                args.bot_id,
                args.platform,
                args.external_conversation_id,
                "",
            )?
            .map(|r| r.conversation_id)
        } else {
            None
        };

        let conversation_id = Uuid::now_v7().to_string();
        conn.execute(
            "INSERT INTO conversations (id, bot_id, kind, parent_id, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?5)",
            params![conversation_id, args.bot_id, kind.to_string(), parent_id, now],
        )?;
        ensure_participant(&conn, &conversation_id, creator_key, ParticipantRole::Owner)?;
        if creator_key != args.channel_identity_id && !args.channel_identity_id.is_empty() {
            ensure_participant(
                &conn,
                &conversation_id,
                args.channel_identity_id,
                ParticipantRole::Member,
            )?;
        }

        let route_id = Uuid::now_v7().to_string();
        conn.execute(
            "INSERT INTO chat_routes
                (id, bot_id, platform, external_conversation_id, thread_id,
                 conversation_id, reply_target, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?8)",
            params![
                route_id,
                args.bot_id,
                args.platform,
                args.external_conversation_id,
                args.thread_id,
                conversation_id,
                args.reply_target,
                now,
            ],
        )?;
        info!(%conversation_id, %route_id, kind = %kind, "conversation created");

        Ok(ResolvedRoute {
            conversation_id,
            route_id,
            created: true,
        })
    }

    pub fn get_route(&self, route_id: &str) -> Result<Option<Route>> {
        let conn = self.db.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, bot_id, platform, external_conversation_id, thread_id,
                        conversation_id, reply_target, created_at, updated_at
                 FROM chat_routes WHERE id = ?1",
                params![route_id],
                row_to_route,
            )
            .optional()?;
        Ok(row)
    }

    pub fn add_participant(
        &self,
        conversation_id: &str,
        participant_key: &str,
        role: ParticipantRole,
    ) -> Result<()> {
        let conn = self.db.lock().unwrap();
        ensure_participant(&conn, conversation_id, participant_key, role)
    }

    /// Strict participant lookup; observed-mode visibility does not count.
    pub fn get_participant(
        &self,
        conversation_id: &str,
        participant_key: &str,
    ) -> Result<Participant> {
        let conn = self.db.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT conversation_id, participant_key, role, created_at
                 FROM chat_participants
                 WHERE conversation_id = ?1 AND participant_key = ?2",
                params![conversation_id, participant_key],
                row_to_participant,
            )
            .optional()?;
        row.ok_or_else(|| ConversationError::NotParticipant(conversation_id.to_string()))
    }

    /// Decide how (and whether) a channel identity may read a conversation.
    ///
    /// `identity_linked` is the caller-resolved link state of the identity;
    /// presence-based visibility only applies to identities that belong to
    /// an internal user.
    pub fn read_access(
        &self,
        conversation_id: &str,
        channel_identity_id: &str,
        identity_linked: bool,
    ) -> Result<ReadAccess> {
        let conn = self.db.lock().unwrap();

        let participant = conn
            .query_row(
                "SELECT conversation_id, participant_key, role, created_at
                 FROM chat_participants
                 WHERE conversation_id = ?1 AND participant_key = ?2",
                params![conversation_id, channel_identity_id],
                row_to_participant,
            )
            .optional()?;
        if let Some(p) = participant {
            return Ok(ReadAccess {
                mode: AccessMode::Participant,
                role: Some(p.role),
                last_observed_at: None,
            });
        }

        if identity_linked {
            let observed: Option<String> = conn
                .query_row(
                    "SELECT last_observed_at FROM chat_presence
                     WHERE conversation_id = ?1 AND channel_identity_id = ?2",
                    params![conversation_id, channel_identity_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(last_observed_at) = observed {
                return Ok(ReadAccess {
                    mode: AccessMode::ObservedThroughChannelIdentity,
                    role: None,
                    last_observed_at: Some(last_observed_at),
                });
            }
        }

        Err(ConversationError::PermissionDenied(format!(
            "identity {channel_identity_id} may not read conversation {conversation_id}"
        )))
    }

    /// Union of participant conversations and observed conversations for one
    /// channel identity, each row tagged with its access mode.
    pub fn list_for_channel_identity(
        &self,
        bot_id: &str,
        channel_identity_id: &str,
        identity_linked: bool,
    ) -> Result<Vec<ConversationListing>> {
        let conn = self.db.lock().unwrap();
        let mut listings = Vec::new();

        let mut stmt = conn.prepare(
            "SELECT c.id, c.bot_id, c.kind, c.parent_id, c.created_at, c.updated_at, p.role
             FROM conversations c
             JOIN chat_participants p ON p.conversation_id = c.id
             WHERE c.bot_id = ?1 AND p.participant_key = ?2
             ORDER BY c.updated_at DESC",
        )?;
        let rows = stmt.query_map(params![bot_id, channel_identity_id], |row| {
            let conversation = row_to_conversation(row)?;
            let role: String = row.get(6)?;
            Ok((conversation, role))
        })?;
        for row in rows {
            let (conversation, role) = row?;
            listings.push(ConversationListing {
                conversation,
                access_mode: AccessMode::Participant,
                role: role.parse().ok(),
                last_observed_at: None,
            });
        }

        if identity_linked {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.bot_id, c.kind, c.parent_id, c.created_at, c.updated_at,
                        pr.last_observed_at
                 FROM conversations c
                 JOIN chat_presence pr ON pr.conversation_id = c.id
                 WHERE c.bot_id = ?1 AND pr.channel_identity_id = ?2
                   AND NOT EXISTS (
                       SELECT 1 FROM chat_participants p
                       WHERE p.conversation_id = c.id AND p.participant_key = ?2
                   )
                 ORDER BY pr.last_observed_at DESC",
            )?;
            let rows = stmt.query_map(params![bot_id, channel_identity_id], |row| {
                let conversation = row_to_conversation(row)?;
                let last_observed_at: String = row.get(6)?;
                Ok((conversation, last_observed_at))
            })?;
            for row in rows {
                let (conversation, last_observed_at) = row?;
                listings.push(ConversationListing {
                    conversation,
                    access_mode: AccessMode::ObservedThroughChannelIdentity,
                    role: None,
                    last_observed_at: Some(last_observed_at),
                });
            }
        }

        Ok(listings)
    }

    /// Append one message, then refresh the sender's presence row. The
    /// presence upsert is advisory — on failure the message append stands.
    pub fn append_message(&self, new: NewMessage) -> Result<Message> {
        if new.conversation_id.is_empty() || new.bot_id.is_empty() || new.role.is_empty() {
            return Err(ConversationError::InvalidInput(
                "conversation, bot and role must not be empty".into(),
            ));
        }

        let message = Message {
            id: Uuid::now_v7().to_string(),
            conversation_id: new.conversation_id,
            bot_id: new.bot_id,
            route_id: new.route_id,
            sender_identity_id: new.sender_identity_id,
            sender_user_id: new.sender_user_id,
            platform: new.platform,
            external_message_id: new.external_message_id,
            role: new.role,
            content: new.content,
            metadata: new.metadata,
            created_at: Utc::now().to_rfc3339(),
        };
        let content_json = serde_json::to_string(&message.content)?;
        let metadata_json = serde_json::to_string(&message.metadata)?;

        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO chat_messages
                (id, conversation_id, bot_id, route_id, sender_identity_id, sender_user_id,
                 platform, external_message_id, role, content, metadata, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            params![
                message.id,
                message.conversation_id,
                message.bot_id,
                message.route_id,
                message.sender_identity_id,
                message.sender_user_id,
                message.platform,
                message.external_message_id,
                message.role,
                content_json,
                metadata_json,
                message.created_at,
            ],
        )?;

        if let Some(sender) = message.sender_identity_id.as_deref() {
            if let Err(e) = conn.execute(
                "INSERT INTO chat_presence (conversation_id, channel_identity_id, last_observed_at)
                 VALUES (?1,?2,?3)
                 ON CONFLICT(conversation_id, channel_identity_id)
                 DO UPDATE SET last_observed_at = ?3",
                params![message.conversation_id, sender, message.created_at],
            ) {
                warn!(error = %e, conversation_id = %message.conversation_id,
                      "presence upsert failed; message kept");
            }
        }

        debug!(message_id = %message.id, conversation_id = %message.conversation_id,
               role = %message.role, "message appended");
        Ok(message)
    }

    /// A page of bot messages ending just before `before`, returned in
    /// ascending created_at order.
    pub fn list_messages(
        &self,
        bot_id: &str,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        let before_str = before
            .map(|t| t.to_rfc3339())
            // Lexicographically above every RFC3339 timestamp.
            .unwrap_or_else(|| "9999".to_string());
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, bot_id, route_id, sender_identity_id, sender_user_id,
                    platform, external_message_id, role, content, metadata, created_at
             FROM chat_messages
             WHERE bot_id = ?1 AND created_at < ?2
             ORDER BY created_at DESC
             LIMIT ?3",
        )?;
        let mut rows = stmt
            .query_map(params![bot_id, before_str, limit as i64], row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.reverse();
        Ok(rows)
    }

    /// Messages created at or after `since`, ascending. Backlog replay for
    /// the message-created event stream.
    pub fn list_messages_since(
        &self,
        bot_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, bot_id, route_id, sender_identity_id, sender_user_id,
                    platform, external_message_id, role, content, metadata, created_at
             FROM chat_messages
             WHERE bot_id = ?1 AND created_at >= ?2
             ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![bot_id, since.to_rfc3339()], row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Bulk clear of a bot's message log. Returns the number of rows
    /// removed; the deletion is committed before this returns.
    pub fn clear_messages(&self, bot_id: &str) -> Result<usize> {
        let conn = self.db.lock().unwrap();
        let rows = conn.execute("DELETE FROM chat_messages WHERE bot_id = ?1", params![bot_id])?;
        info!(bot_id, removed = rows, "bot messages cleared");
        Ok(rows)
    }
}

fn find_route(
    conn: &Connection,
    bot_id: &str,
    platform: &str,
    external_conversation_id: &str,
    thread_id: &str,
) -> Result<Option<Route>> {
    let row = conn
        .query_row(
            ROUTE_SELECT_SQL,
            params![bot_id, platform, external_conversation_id, thread_id],
            row_to_route,
        )
        .optional()?;
    Ok(row)
}

fn ensure_participant(
    conn: &Connection,
    conversation_id: &str,
    participant_key: &str,
    role: ParticipantRole,
) -> Result<()> {
    if participant_key.is_empty() {
        return Ok(());
    }
    conn.execute(
        "INSERT OR IGNORE INTO chat_participants
            (conversation_id, participant_key, role, created_at)
         VALUES (?1,?2,?3,?4)",
        params![
            conversation_id,
            participant_key,
            role.to_string(),
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use serde_json::json;

    fn store() -> ConversationStore {
        let conn = Connection::open_in_memory().unwrap();
        memoh_users::db::init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO users (id, username, password_hash, role, active, created_at, updated_at)
             VALUES ('owner-1', 'owner-1', 'x', 'member', 1, ?1, ?1)",
            [&now],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO bots (id, owner_user_id, name, kind, active, created_at, updated_at)
             VALUES ('bot-1', 'owner-1', 'bot-1', 'personal', 1, ?1, ?1)",
            [&now],
        )
        .unwrap();
        ConversationStore::new(Arc::new(Mutex::new(conn)))
    }

    fn args<'a>(thread_id: &'a str, conv_type: &'a str) -> ResolveChatArgs<'a> {
        ResolveChatArgs {
            bot_id: "bot-1",
            bot_owner_user_id: "owner-1",
            platform: "feishu",
            external_conversation_id: "oc_1",
            thread_id,
            conversation_type: conv_type,
            channel_identity_id: "ci-1",
            reply_target: "oc_1",
        }
    }

    #[test]
    fn resolve_creates_then_reuses_route() {
        let store = store();
        let first = store.resolve_chat(&args("", "p2p")).unwrap();
        assert!(first.created);

        let second = store.resolve_chat(&args("", "p2p")).unwrap();
        assert!(!second.created);
        assert_eq!(first.conversation_id, second.conversation_id);
        assert_eq!(first.route_id, second.route_id);

        let conv = store.get_conversation(&first.conversation_id).unwrap().unwrap();
        assert_eq!(conv.kind, ConversationKind::Direct);
    }

    #[test]
    fn group_owner_is_bot_owner_and_sender_becomes_member() {
        let store = store();
        let resolved = store.resolve_chat(&args("", "group")).unwrap();

        let owner = store
            .get_participant(&resolved.conversation_id, "owner-1")
            .unwrap();
        assert_eq!(owner.role, ParticipantRole::Owner);

        let sender = store
            .get_participant(&resolved.conversation_id, "ci-1")
            .unwrap();
        assert_eq!(sender.role, ParticipantRole::Member);
    }

    #[test]
    fn thread_parent_points_at_base_conversation() {
        let store = store();
        let base = store.resolve_chat(&args("", "group")).unwrap();
        let thread = store.resolve_chat(&args("t-9", "group")).unwrap();

        let conv = store.get_conversation(&thread.conversation_id).unwrap().unwrap();
        assert_eq!(conv.kind, ConversationKind::Thread);
        assert_eq!(conv.parent_id.as_deref(), Some(base.conversation_id.as_str()));
    }

    #[test]
    fn reply_target_updates_opportunistically() {
        let store = store();
        let first = store.resolve_chat(&args("", "p2p")).unwrap();

        let mut changed = args("", "p2p");
        changed.reply_target = "oc_1_new";
        store.resolve_chat(&changed).unwrap();

        let route = store.get_route(&first.route_id).unwrap().unwrap();
        assert_eq!(route.reply_target, "oc_1_new");
    }

    #[test]
    fn observer_visibility_requires_link() {
        let store = store();
        let resolved = store.resolve_chat(&args("", "group")).unwrap();

        // ci-2 is not a participant but speaks in the conversation.
        store
            .append_message(NewMessage {
                conversation_id: resolved.conversation_id.clone(),
                bot_id: "bot-1".into(),
                sender_identity_id: Some("ci-2".into()),
                platform: "feishu".into(),
                role: "user".into(),
                content: json!("hi"),
                metadata: json!({}),
                ..Default::default()
            })
            .unwrap();

        // Unlinked: no visibility at all.
        assert!(store
            .read_access(&resolved.conversation_id, "ci-2", false)
            .is_err());
        assert!(store
            .list_for_channel_identity("bot-1", "ci-2", false)
            .unwrap()
            .is_empty());

        // Linked: observed mode, still not a participant.
        let access = store
            .read_access(&resolved.conversation_id, "ci-2", true)
            .unwrap();
        assert_eq!(access.mode, AccessMode::ObservedThroughChannelIdentity);
        assert!(access.role.is_none());
        assert!(access.last_observed_at.is_some());

        let listings = store
            .list_for_channel_identity("bot-1", "ci-2", true)
            .unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(
            listings[0].access_mode,
            AccessMode::ObservedThroughChannelIdentity
        );

        assert!(matches!(
            store.get_participant(&resolved.conversation_id, "ci-2"),
            Err(ConversationError::NotParticipant(_))
        ));
    }

    #[test]
    fn clear_is_observable_immediately() {
        let store = store();
        let resolved = store.resolve_chat(&args("", "p2p")).unwrap();
        store
            .append_message(NewMessage {
                conversation_id: resolved.conversation_id.clone(),
                bot_id: "bot-1".into(),
                platform: "feishu".into(),
                role: "user".into(),
                content: json!("hello"),
                metadata: json!({}),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(store.list_messages("bot-1", 10, None).unwrap().len(), 1);
        assert_eq!(store.clear_messages("bot-1").unwrap(), 1);
        assert!(store.list_messages("bot-1", 10, None).unwrap().is_empty());
    }
}
