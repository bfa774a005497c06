use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use memoh_channels::{ChannelManager, Intake};
use memoh_chat::ChatResolver;
use memoh_conversations::ConversationStore;
use memoh_core::MemohConfig;
use memoh_history::HistoryStore;
use memoh_identity::{BindService, IdentityService};
use memoh_scheduler::ScheduleExecutor;
use memoh_users::Directory;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;

use crate::auth::TokenSigner;

/// Capacity of the message-created fan-out. Slow SSE subscribers that lag
/// past this many events miss the backlog and resync via `since`.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A message was appended to some bot's log. Published on every append so
/// the events endpoint can fan it out.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub bot_id: String,
    pub message: serde_json::Value,
}

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: MemohConfig,
    pub directory: Arc<Directory>,
    pub identities: Arc<IdentityService>,
    pub bind: Arc<BindService>,
    pub conversations: Arc<ConversationStore>,
    pub history: Arc<HistoryStore>,
    pub resolver: Arc<ChatResolver>,
    pub scheduler: Arc<ScheduleExecutor>,
    pub intake: Arc<Intake>,
    /// Registered platform adapters. tokio Mutex: connect/disconnect are
    /// async and hold the lock across awaits.
    pub channels: tokio::sync::Mutex<ChannelManager>,
    pub tokens: TokenSigner,
    pub message_events: broadcast::Sender<MessageEvent>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MemohConfig,
        directory: Arc<Directory>,
        identities: Arc<IdentityService>,
        bind: Arc<BindService>,
        conversations: Arc<ConversationStore>,
        history: Arc<HistoryStore>,
        resolver: Arc<ChatResolver>,
        scheduler: Arc<ScheduleExecutor>,
        intake: Arc<Intake>,
    ) -> Self {
        let tokens = TokenSigner::new(&config.auth.secret);
        let (message_events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            directory,
            identities,
            bind,
            conversations,
            history,
            resolver,
            scheduler,
            intake,
            channels: tokio::sync::Mutex::new(ChannelManager::new()),
            tokens,
            message_events,
        }
    }

    pub fn publish_message(&self, bot_id: &str, message: serde_json::Value) {
        // Nobody listening is fine; send only fails then.
        let _ = self.message_events.send(MessageEvent {
            bot_id: bot_id.to_string(),
            message,
        });
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/auth/login", post(crate::http::login::login_handler))
        .route(
            "/bots/{bot}/messages",
            post(crate::http::chat::chat_handler)
                .get(crate::http::messages::list_messages_handler)
                .delete(crate::http::messages::clear_messages_handler),
        )
        .route(
            "/bots/{bot}/messages/stream",
            post(crate::http::chat::chat_stream_handler),
        )
        .route(
            "/bots/{bot}/messages/events",
            get(crate::http::events::message_events_handler),
        )
        .route(
            "/users/me/bind_codes",
            post(crate::http::bind::issue_bind_code_handler),
        )
        .route(
            "/bots/{bot}/preauth_keys",
            post(crate::http::preauth::issue_preauth_handler),
        )
        .route(
            "/bots/{bot}/schedule",
            post(crate::http::schedule::create_handler).get(crate::http::schedule::list_handler),
        )
        .route(
            "/bots/{bot}/schedule/{id}",
            get(crate::http::schedule::get_handler)
                .put(crate::http::schedule::update_handler)
                .delete(crate::http::schedule::delete_handler),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}
