// End-to-end identity/visibility flow across the stores, the way the intake
// and the HTTP layer drive them: a stranger speaks in a group conversation,
// gains nothing until a bind code links them to a user, and then sees the
// conversation in observed mode without ever becoming a participant.

use std::sync::{Arc, Mutex};

use memoh_conversations::{
    AccessMode, ConversationError, ConversationStore, NewMessage, ResolveChatArgs,
};
use memoh_core::types::{BotKind, UserRole};
use memoh_identity::{BindService, IdentityService};
use memoh_users::Directory;
use rusqlite::Connection;
use serde_json::json;

struct World {
    directory: Arc<Directory>,
    identities: Arc<IdentityService>,
    bind: Arc<BindService>,
    conversations: Arc<ConversationStore>,
}

fn world() -> World {
    let conn = Connection::open_in_memory().unwrap();
    memoh_users::db::init_db(&conn).unwrap();
    memoh_identity::db::init_db(&conn).unwrap();
    memoh_conversations::db::init_db(&conn).unwrap();
    let db = Arc::new(Mutex::new(conn));
    World {
        directory: Arc::new(Directory::new(db.clone())),
        identities: Arc::new(IdentityService::new(db.clone())),
        bind: Arc::new(BindService::new(db.clone())),
        conversations: Arc::new(ConversationStore::new(db)),
    }
}

#[test]
fn observer_visibility_follows_the_identity_link() {
    let w = world();
    let owner = w.directory.create_user("owner", "pw", UserRole::Member).unwrap();
    let watcher = w.directory.create_user("watcher", "pw", UserRole::Member).unwrap();
    let bot = w
        .directory
        .create_bot(&owner.id, "groupbot", BotKind::Shared)
        .unwrap();

    // A group conversation opened by some member.
    let member = w.identities.get_or_create("feishu", "ou_member", "Member").unwrap();
    let resolved = w
        .conversations
        .resolve_chat(&ResolveChatArgs {
            bot_id: &bot.id,
            bot_owner_user_id: &bot.owner_user_id,
            platform: "feishu",
            external_conversation_id: "oc_group",
            thread_id: "",
            conversation_type: "group",
            channel_identity_id: &member.id,
            reply_target: "oc_group",
        })
        .unwrap();

    // A stranger speaks in the group: presence recorded, no membership.
    let stranger = w.identities.get_or_create("feishu", "ou_stranger", "Stranger").unwrap();
    w.conversations
        .append_message(NewMessage {
            conversation_id: resolved.conversation_id.clone(),
            bot_id: bot.id.clone(),
            route_id: Some(resolved.route_id.clone()),
            sender_identity_id: Some(stranger.id.clone()),
            sender_user_id: None,
            platform: "feishu".into(),
            external_message_id: None,
            role: "user".into(),
            content: json!("hello from outside"),
            metadata: json!({}),
        })
        .unwrap();

    // Before the link: nothing is visible.
    let linked = stranger.user_id.is_some();
    assert!(!linked);
    assert!(w
        .conversations
        .list_for_channel_identity(&bot.id, &stranger.id, linked)
        .unwrap()
        .is_empty());
    assert!(w
        .conversations
        .read_access(&resolved.conversation_id, &stranger.id, linked)
        .is_err());

    // The watcher issues a bind code and the stranger consumes it.
    let code = w.bind.issue(&watcher.id, Some("feishu"), 600).unwrap();
    w.bind.consume(&code, &stranger.id).unwrap();
    let stranger = w.identities.get(&stranger.id).unwrap().unwrap();
    assert_eq!(stranger.user_id.as_deref(), Some(watcher.id.as_str()));

    // After the link: observed-mode visibility, still not a participant.
    let listings = w
        .conversations
        .list_for_channel_identity(&bot.id, &stranger.id, true)
        .unwrap();
    assert_eq!(listings.len(), 1);
    assert_eq!(
        listings[0].access_mode,
        AccessMode::ObservedThroughChannelIdentity
    );
    assert!(listings[0].role.is_none());
    assert!(listings[0].last_observed_at.is_some());

    let access = w
        .conversations
        .read_access(&resolved.conversation_id, &stranger.id, true)
        .unwrap();
    assert_eq!(access.mode, AccessMode::ObservedThroughChannelIdentity);

    assert!(matches!(
        w.conversations.get_participant(&resolved.conversation_id, &stranger.id),
        Err(ConversationError::NotParticipant(_))
    ));
}

#[test]
fn deleting_a_bot_cascades_to_its_conversation_graph() {
    let conn = Connection::open_in_memory().unwrap();
    // The cascade path relies on foreign keys, as the server enables them.
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    memoh_users::db::init_db(&conn).unwrap();
    memoh_identity::db::init_db(&conn).unwrap();
    memoh_conversations::db::init_db(&conn).unwrap();
    let db = Arc::new(Mutex::new(conn));
    let directory = Directory::new(db.clone());
    let identities = IdentityService::new(db.clone());
    let conversations = ConversationStore::new(db);

    let owner = directory.create_user("owner", "pw", UserRole::Member).unwrap();
    let bot = directory.create_bot(&owner.id, "doomed", BotKind::Personal).unwrap();

    let sender = identities.get_or_create("feishu", "ou_1", "Ada").unwrap();
    let resolved = conversations
        .resolve_chat(&ResolveChatArgs {
            bot_id: &bot.id,
            bot_owner_user_id: &bot.owner_user_id,
            platform: "feishu",
            external_conversation_id: "oc_1",
            thread_id: "",
            conversation_type: "p2p",
            channel_identity_id: &sender.id,
            reply_target: "oc_1",
        })
        .unwrap();
    conversations
        .append_message(NewMessage {
            conversation_id: resolved.conversation_id.clone(),
            bot_id: bot.id.clone(),
            route_id: Some(resolved.route_id.clone()),
            sender_identity_id: Some(sender.id.clone()),
            sender_user_id: None,
            platform: "feishu".into(),
            external_message_id: None,
            role: "user".into(),
            content: json!("hi"),
            metadata: json!({}),
        })
        .unwrap();

    directory.delete_bot(&bot.id).unwrap();

    assert!(directory.get_bot(&bot.id).unwrap().is_none());
    assert!(conversations
        .get_conversation(&resolved.conversation_id)
        .unwrap()
        .is_none());
    assert!(conversations.get_route(&resolved.route_id).unwrap().is_none());
    assert!(conversations.list_messages(&bot.id, 10, None).unwrap().is_empty());
}

#[test]
fn bind_conflict_cannot_steal_an_identity() {
    let w = world();
    let u1 = w.directory.create_user("u1", "pw", UserRole::Member).unwrap();
    let u2 = w.directory.create_user("u2", "pw", UserRole::Member).unwrap();

    let identity = w.identities.get_or_create("telegram", "42", "Bob").unwrap();
    w.identities.link_to_user(&identity.id, &u2.id).unwrap();

    let code = w.bind.issue(&u1.id, None, 600).unwrap();
    assert!(w.bind.consume(&code, &identity.id).is_err());

    // Neither side changed: the identity still belongs to u2 and the code
    // can still be consumed by the right identity later.
    let identity = w.identities.get(&identity.id).unwrap().unwrap();
    assert_eq!(identity.user_id.as_deref(), Some(u2.id.as_str()));
    assert!(w.bind.get(&code.token).unwrap().used_at.is_none());
}
