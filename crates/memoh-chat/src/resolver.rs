//! The chat resolver: assembles per-request context, invokes the agent
//! gateway (sync or streaming), and commits exactly one history round per
//! completed call.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use memoh_agent::{is_done_sentinel, terminal_round, GatewayClient, SseFrame};
use memoh_core::types::Provider;
use memoh_history::HistoryStore;
use memoh_protocol::{
    normalize_message, Envelope, IdentityBlock, ModelBlock, NormalizedMessage, RoundPayload,
    ScheduleBlock,
};
use memoh_users::Directory;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ChatError, Result};
use crate::memory::MemoryIngestor;
use crate::skills::SkillLoader;
use crate::types::{ChatRequest, ChatResponse, ChatStream, ResolvedContext};

/// Session prefix for schedule-originated rounds. Downstream history
/// queries filter on it, so the literal is part of the storage contract.
pub const SCHEDULE_SESSION_PREFIX: &str = "schedule:";

/// History window applied when neither the request nor any settings level
/// names one (minutes).
const DEFAULT_CONTEXT_MINUTES: i64 = 120;

/// Buffered chunks between the SSE reader and a slow subscriber.
const CHUNK_CHANNEL_CAPACITY: usize = 64;

pub struct ChatResolver {
    directory: Arc<Directory>,
    history: Arc<HistoryStore>,
    gateway: Arc<GatewayClient>,
    skills: Arc<dyn SkillLoader>,
    memory: Arc<dyn MemoryIngestor>,
}

impl ChatResolver {
    pub fn new(
        directory: Arc<Directory>,
        history: Arc<HistoryStore>,
        gateway: Arc<GatewayClient>,
        skills: Arc<dyn SkillLoader>,
        memory: Arc<dyn MemoryIngestor>,
    ) -> Self {
        Self {
            directory,
            history,
            gateway,
            skills,
            memory,
        }
    }

    /// Assemble the gateway request envelope for one chat invocation.
    ///
    /// Model priority is request > bot settings > user settings; provider,
    /// api key and base url cascade bot > user. History is loaded within
    /// `[now − window, now]` unless the window is negative (skip
    /// sentinel). Skill and tool-connection loading never fail the call.
    pub fn resolve(&self, req: &ChatRequest) -> Result<ResolvedContext> {
        if req.query.trim().is_empty() {
            return Err(ChatError::Validation("query must not be empty".into()));
        }
        if req.bot_id.is_empty() {
            return Err(ChatError::Validation("bot id must not be empty".into()));
        }
        if req.session.is_empty() {
            return Err(ChatError::Validation("session must not be empty".into()));
        }

        let bot = self
            .directory
            .get_bot(&req.bot_id)?
            .ok_or_else(|| ChatError::NotFound(format!("bot {}", req.bot_id)))?;
        let bot_settings = self.directory.bot_settings(&bot.id)?;
        let user_settings = self.directory.user_settings(&bot.owner_user_id)?;

        let model_id = req
            .model
            .clone()
            .filter(|m| !m.is_empty())
            .or_else(|| bot_settings.chat_model.clone())
            .or_else(|| user_settings.chat_model.clone())
            .ok_or_else(|| ChatError::Config("no chat model configured".into()))?;

        let provider_tag = bot_settings
            .provider
            .clone()
            .or_else(|| user_settings.provider.clone())
            .unwrap_or_default();
        let provider = Provider::normalize(&provider_tag)
            .ok_or_else(|| ChatError::Config(format!("unknown provider: {provider_tag:?}")))?;

        let api_key = bot_settings
            .api_key
            .clone()
            .or_else(|| user_settings.api_key.clone())
            .unwrap_or_default();
        let base_url = bot_settings
            .base_url
            .clone()
            .or_else(|| user_settings.base_url.clone())
            .unwrap_or_default();

        let context_minutes = req
            .max_context_minutes
            .or(bot_settings.max_context_minutes)
            .or(user_settings.max_context_minutes)
            .unwrap_or(DEFAULT_CONTEXT_MINUTES);

        // History window; a negative window is the "skip history" sentinel.
        let mut messages: Vec<Value> = Vec::new();
        let mut skill_tags: Vec<String> = Vec::new();
        if context_minutes >= 0 {
            let since = Utc::now() - Duration::minutes(context_minutes);
            let records = self
                .history
                .window(&req.bot_id, &req.session, Some(since))?;
            for record in records {
                messages.extend(
                    record
                        .messages
                        .into_iter()
                        .filter(is_usable_history_message),
                );
                skill_tags.extend(record.skills);
            }
        }
        messages.extend(req.messages.iter().cloned());
        skill_tags.extend(req.skills.iter().cloned());
        let skills = dedup_preserving_order(skill_tags);

        let usable_skills = match self.skills.load_usable(&skills) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(error = %e, "skill load failed; continuing without skills");
                Vec::new()
            }
        };

        let mcp_connections = match self.directory.active_tool_connections(&bot.id) {
            Ok(connections) => connections
                .into_iter()
                .map(|c| {
                    let mut entry = serde_json::Map::new();
                    entry.insert("name".into(), Value::String(c.name));
                    entry.insert("type".into(), Value::String(c.kind));
                    if let Value::Object(config) = c.config {
                        entry.extend(config);
                    }
                    Value::Object(entry)
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "tool connection load failed; continuing without tools");
                Vec::new()
            }
        };

        let container_id = match req.container_id.clone().filter(|c| !c.is_empty()) {
            Some(explicit) => explicit,
            None => self
                .directory
                .container_for_bot(&bot.id)?
                .unwrap_or_else(|| format!("mcp-{}", bot.id)),
        };

        let envelope = Envelope {
            model: ModelBlock {
                model_id: model_id.clone(),
                client_type: provider.as_str().to_string(),
                input: Vec::new(),
                api_key,
                base_url,
            },
            active_context_time: context_minutes,
            channels: req.channels.clone(),
            current_channel: req.current_channel.clone(),
            allowed_actions: req.allowed_actions.clone(),
            mcp_connections,
            messages,
            skills: skills.clone(),
            usable_skills,
            query: req.query.clone(),
            identity: IdentityBlock {
                bot_id: bot.id.clone(),
                session_id: req.session.clone(),
                container_id,
                contact_id: req.contact_id.clone(),
                contact_name: req.contact_name.clone(),
                contact_alias: req.contact_alias.clone(),
                user_id: req.user_id.clone(),
                current_platform: req.current_platform.clone(),
                reply_target: req.reply_target.clone(),
                session_token: req.session_token.clone(),
            },
            attachments: Vec::new(),
            schedule: None,
        };

        debug!(bot_id = %bot.id, session = %req.session, model = %model_id,
               history = envelope.messages.len(), "context resolved");

        Ok(ResolvedContext {
            envelope,
            model_id,
            provider,
            skills,
        })
    }

    /// Synchronous chat: resolve, POST, persist one round, return the typed
    /// message list.
    pub async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let ctx = self.resolve(req)?;
        let payload = self.gateway.chat(&ctx.envelope).await?;
        self.round_writer()
            .store(&req.bot_id, &req.session, &payload)
            .await?;
        Ok(finish_response(ctx, payload))
    }

    /// Streaming chat.
    ///
    /// Returns immediately with the chunk/error stream pair; a background
    /// task drives the SSE reader. The round is persisted on the first
    /// terminal frame; chunks keep flowing afterwards. Cancelling `cancel`
    /// closes both streams without persisting a partial round and without
    /// emitting an error.
    pub fn stream_chat(&self, req: &ChatRequest, cancel: CancellationToken) -> ChatStream {
        let (chunks_tx, chunks_rx) = mpsc::channel::<Value>(CHUNK_CHANNEL_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::channel::<ChatError>(1);
        let stream = ChatStream {
            chunks: chunks_rx,
            errors: errors_rx,
        };

        let ctx = match self.resolve(req) {
            Ok(ctx) => ctx,
            Err(e) => {
                // Failed before anything was sent: emit the error and close
                // both streams by dropping the senders.
                let _ = errors_tx.try_send(e);
                return stream;
            }
        };

        let gateway = self.gateway.clone();
        let writer = self.round_writer();
        let bot_id = req.bot_id.clone();
        let session = req.session.clone();

        tokio::spawn(async move {
            let (frames_tx, mut frames_rx) = mpsc::channel::<SseFrame>(CHUNK_CHANNEL_CAPACITY);
            let reader = tokio::spawn({
                let envelope = ctx.envelope;
                async move { gateway.stream(&envelope, frames_tx, cancel).await }
            });

            let mut stored = false;
            let mut error_sent = false;
            while let Some(frame) = frames_rx.recv().await {
                if is_done_sentinel(&frame) {
                    continue;
                }
                // Exactly-once persistence under racing terminals: only the
                // first terminal that actually stores flips the flag; the
                // read loop itself never short-circuits.
                if !stored && !error_sent {
                    if let Some(payload) = terminal_round(&frame) {
                        match writer.store(&bot_id, &session, &payload).await {
                            Ok(true) => stored = true,
                            Ok(false) => {}
                            Err(e) => {
                                error_sent = true;
                                let _ = errors_tx.send(e).await;
                            }
                        }
                    }
                }
                let value = serde_json::from_str::<Value>(&frame.data)
                    .unwrap_or_else(|_| Value::String(frame.data.clone()));
                if chunks_tx.send(value).await.is_err() {
                    break; // subscriber hung up
                }
            }

            // Unblocks the reader if it is mid-send after a subscriber
            // hang-up; its next send fails and it exits cleanly.
            drop(frames_rx);

            match reader.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    let err = ChatError::from(e);
                    if !error_sent && !err.is_cancellation() {
                        let _ = errors_tx.send(err).await;
                    }
                }
                Err(join_err) => {
                    if !error_sent {
                        let _ = errors_tx
                            .send(ChatError::Internal(format!(
                                "stream reader panicked: {join_err}"
                            )))
                            .await;
                    }
                }
            }
            // Dropping the senders closes both streams; the persistence
            // effect above is already visible at that point.
        });

        stream
    }

    /// Schedule-fire variant of `chat`. Uses the synthetic
    /// `schedule:{id}` session, addresses the bot itself as the contact,
    /// and forwards the schedule block to the gateway's trigger endpoint
    /// under the short-lived owner token.
    pub async fn trigger_schedule(
        &self,
        bot_id: &str,
        schedule: ScheduleBlock,
        owner_token: &str,
    ) -> Result<ChatResponse> {
        let req = ChatRequest {
            query: schedule.command.clone(),
            bot_id: bot_id.to_string(),
            session: format!("{SCHEDULE_SESSION_PREFIX}{}", schedule.id),
            contact_id: bot_id.to_string(),
            contact_name: "Scheduler".to_string(),
            current_channel: "schedule".to_string(),
            session_token: Some(owner_token.to_string()),
            ..Default::default()
        };

        let mut ctx = self.resolve(&req)?;
        ctx.envelope.schedule = Some(schedule);

        let payload = self.gateway.trigger_schedule(&ctx.envelope).await?;
        self.round_writer()
            .store(&req.bot_id, &req.session, &payload)
            .await?;
        info!(bot_id, session = %req.session, "schedule round completed");
        Ok(finish_response(ctx, payload))
    }

    fn round_writer(&self) -> RoundWriter {
        RoundWriter {
            history: self.history.clone(),
            memory: self.memory.clone(),
        }
    }
}

/// Persists one round: history first (errors surface), then memory
/// ingestion fire-and-forget (errors logged, never surfaced).
#[derive(Clone)]
struct RoundWriter {
    history: Arc<HistoryStore>,
    memory: Arc<dyn MemoryIngestor>,
}

impl RoundWriter {
    /// Returns `Ok(true)` when a record was written; an empty message list
    /// is not a round and writes nothing.
    async fn store(&self, bot_id: &str, session: &str, payload: &RoundPayload) -> Result<bool> {
        if payload.messages.is_empty() {
            return Ok(false);
        }
        self.history
            .append(bot_id, session, &payload.messages, &payload.skills)?;

        let memory = self.memory.clone();
        let bot_id = bot_id.to_string();
        let session = session.to_string();
        let messages = payload.messages.clone();
        tokio::spawn(async move {
            if let Err(e) = memory.ingest_round(&bot_id, &session, &messages).await {
                warn!(error = %e, bot_id = %bot_id, "memory ingest failed; round kept");
            }
        });
        Ok(true)
    }
}

fn finish_response(ctx: ResolvedContext, payload: RoundPayload) -> ChatResponse {
    let mut messages: Vec<NormalizedMessage> = Vec::new();
    for raw in &payload.messages {
        if let Value::Object(map) = raw {
            messages.extend(normalize_message(map));
        }
    }
    let skills = if payload.skills.is_empty() {
        ctx.skills
    } else {
        payload.skills
    };
    ChatResponse {
        messages,
        skills,
        model_id: ctx.model_id,
        provider: ctx.provider,
    }
}

/// Drop history items that would confuse the gateway: missing role, or no
/// content and no tool calls.
fn is_usable_history_message(message: &Value) -> bool {
    let Some(map) = message.as_object() else {
        return false;
    };
    let role_ok = map
        .get("role")
        .and_then(Value::as_str)
        .is_some_and(|r| !r.is_empty());
    if !role_ok {
        return false;
    }
    let has_tool_calls = map
        .get("tool_calls")
        .and_then(Value::as_array)
        .is_some_and(|calls| !calls.is_empty());
    let content_ok = match map.get("content") {
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(parts)) => !parts.is_empty(),
        Some(Value::Object(_)) => true,
        _ => false,
    };
    content_ok || has_tool_calls
}

fn dedup_preserving_order(tags: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::NoopMemory;
    use crate::skills::{SkillError, SkillLoader};
    use memoh_agent::FrameScanner;
    use memoh_core::types::{BotKind, UserRole};
    use memoh_protocol::UsableSkill;
    use memoh_users::ChatSettings;
    use rusqlite::Connection;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    struct StaticSkills;

    impl SkillLoader for StaticSkills {
        fn load_usable(&self, names: &[String]) -> std::result::Result<Vec<UsableSkill>, SkillError> {
            Ok(names
                .iter()
                .map(|n| UsableSkill {
                    name: n.clone(),
                    description: String::new(),
                    content: String::new(),
                    metadata: None,
                })
                .collect())
        }
    }

    struct Fixture {
        resolver: ChatResolver,
        history: Arc<HistoryStore>,
        bot_id: String,
    }

    fn fixture() -> Fixture {
        let conn = Connection::open_in_memory().unwrap();
        memoh_users::db::init_db(&conn).unwrap();
        memoh_history::db::init_db(&conn).unwrap();
        let db = Arc::new(Mutex::new(conn));

        let directory = Arc::new(Directory::new(db.clone()));
        let history = Arc::new(HistoryStore::new(db));
        let owner = directory.create_user("owner", "pw", UserRole::Member).unwrap();
        let bot = directory.create_bot(&owner.id, "helper", BotKind::Personal).unwrap();
        directory
            .set_bot_settings(
                &bot.id,
                &ChatSettings {
                    chat_model: Some("claude-sonnet-4".into()),
                    provider: Some("Anthropic".into()),
                    api_key: Some("sk-test".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        // Port 9 is discard; these tests never reach the gateway.
        let gateway =
            Arc::new(GatewayClient::new("http://127.0.0.1:9", StdDuration::from_secs(1)).unwrap());
        let resolver = ChatResolver::new(
            directory,
            history.clone(),
            gateway,
            Arc::new(StaticSkills),
            Arc::new(NoopMemory),
        );
        Fixture {
            resolver,
            history,
            bot_id: bot.id,
        }
    }

    fn request(fix: &Fixture) -> ChatRequest {
        ChatRequest {
            query: "hello".into(),
            bot_id: fix.bot_id.clone(),
            session: "s-1".into(),
            current_channel: "webchat".into(),
            contact_id: "ci-1".into(),
            contact_name: "Ada".into(),
            ..Default::default()
        }
    }

    #[test]
    fn resolve_validates_inputs() {
        let fix = fixture();
        let mut req = request(&fix);
        req.query = "  ".into();
        assert!(matches!(
            fix.resolver.resolve(&req),
            Err(ChatError::Validation(_))
        ));

        let mut req = request(&fix);
        req.bot_id = "missing".into();
        assert!(matches!(
            fix.resolver.resolve(&req),
            Err(ChatError::NotFound(_))
        ));
    }

    #[test]
    fn explicit_model_wins_and_provider_normalizes() {
        let fix = fixture();
        let mut req = request(&fix);
        req.model = Some("claude-opus-4".into());

        let ctx = fix.resolver.resolve(&req).unwrap();
        assert_eq!(ctx.model_id, "claude-opus-4");
        assert_eq!(ctx.provider, Provider::Anthropic);
        assert_eq!(ctx.envelope.model.client_type, "anthropic");
    }

    #[test]
    fn container_falls_back_to_naming_convention() {
        let fix = fixture();
        let ctx = fix.resolver.resolve(&request(&fix)).unwrap();
        assert_eq!(
            ctx.envelope.identity.container_id,
            format!("mcp-{}", fix.bot_id)
        );
    }

    #[test]
    fn history_is_sanitized_and_skills_deduped() {
        let fix = fixture();
        fix.history
            .append(
                &fix.bot_id,
                "s-1",
                &[
                    json!({"role": "user", "content": "kept"}),
                    json!({"role": "", "content": "dropped"}),
                    json!({"role": "assistant", "content": "  "}),
                ],
                &["a".to_string(), "b".to_string()],
            )
            .unwrap();

        let mut req = request(&fix);
        req.skills = vec!["b".into(), "c".into()];
        let ctx = fix.resolver.resolve(&req).unwrap();

        assert_eq!(ctx.envelope.messages.len(), 1);
        assert_eq!(ctx.skills, vec!["a", "b", "c"]);
        assert_eq!(ctx.envelope.usable_skills.len(), 3);
    }

    #[test]
    fn tool_connections_flatten_into_mcp_connections() {
        let fix = fixture();
        fix.resolver
            .directory
            .upsert_tool_connection(
                &fix.bot_id,
                "files",
                "stdio",
                &json!({"cmd": "fs-server", "args": ["--root", "/tmp"]}),
            )
            .unwrap();
        fix.resolver
            .directory
            .set_container(&fix.bot_id, "mcp-custom")
            .unwrap();

        let ctx = fix.resolver.resolve(&request(&fix)).unwrap();
        assert_eq!(ctx.envelope.mcp_connections.len(), 1);
        let entry = ctx.envelope.mcp_connections[0].as_object().unwrap();
        assert_eq!(entry["name"], "files");
        assert_eq!(entry["type"], "stdio");
        assert_eq!(entry["cmd"], "fs-server");
        // A registered container binding beats the naming-convention fallback.
        assert_eq!(ctx.envelope.identity.container_id, "mcp-custom");
    }

    #[test]
    fn negative_window_skips_history() {
        let fix = fixture();
        fix.history
            .append(&fix.bot_id, "s-1", &[json!({"role": "user", "content": "old"})], &[])
            .unwrap();

        let mut req = request(&fix);
        req.max_context_minutes = Some(-1);
        let ctx = fix.resolver.resolve(&req).unwrap();
        assert!(ctx.envelope.messages.is_empty());
        assert_eq!(ctx.envelope.active_context_time, -1);
    }

    #[tokio::test]
    async fn empty_round_is_not_persisted() {
        let fix = fixture();
        let writer = fix.resolver.round_writer();
        let payload = RoundPayload {
            messages: vec![],
            skills: vec!["x".into()],
        };
        assert!(!writer.store(&fix.bot_id, "s-1", &payload).await.unwrap());
        assert!(fix.history.window(&fix.bot_id, "s-1", None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn each_terminal_variant_persists_exactly_one_round() {
        let fix = fixture();
        let writer = fix.resolver.round_writer();

        let bodies = [
            "event: done\ndata: {\"messages\":[{\"role\":\"assistant\",\"content\":\"ok\"}]}\n\n",
            "data: {\"type\":\"agent_end\",\"messages\":[{\"role\":\"assistant\",\"content\":\"ok2\"}],\"skills\":[\"s\"]}\n\n",
            "data: {\"messages\":[{\"role\":\"assistant\",\"content\":\"ok3\"}]}\n\n",
        ];

        for (i, body) in bodies.iter().enumerate() {
            let session = format!("term-{i}");
            let mut scanner = FrameScanner::new();
            let mut stored = false;
            for frame in scanner.push_chunk(body.as_bytes()).unwrap() {
                if let Some(payload) = terminal_round(&frame) {
                    if !stored {
                        stored = writer.store(&fix.bot_id, &session, &payload).await.unwrap();
                    }
                }
            }
            assert!(stored, "variant {i} must persist");
            let records = fix.history.window(&fix.bot_id, &session, None).unwrap();
            assert_eq!(records.len(), 1, "variant {i} must persist exactly once");
        }
    }

    #[tokio::test]
    async fn stream_chat_emits_resolve_errors_on_error_stream() {
        let fix = fixture();
        let mut req = request(&fix);
        req.query = String::new();

        let mut stream = fix
            .resolver
            .stream_chat(&req, CancellationToken::new());
        let err = stream.errors.recv().await.expect("one error value");
        assert!(matches!(err, ChatError::Validation(_)));
        // Single-shot: the stream is closed after the first value.
        assert!(stream.errors.recv().await.is_none());
        assert!(stream.chunks.recv().await.is_none());
    }
}
