//! GET /bots/{bot}/messages/events — live message-created events over SSE.
//!
//! Optional `since` replays the backlog of messages created at or after the
//! timestamp before switching to live fan-out. A `{"type":"ping"}` frame
//! every 20 seconds keeps intermediaries from closing an idle stream.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::app::AppState;
use crate::auth::authenticate;
use crate::error::ApiError;

const PING_INTERVAL: Duration = Duration::from_secs(20);

#[derive(Deserialize)]
pub struct EventsQuery {
    pub since: Option<String>,
}

pub async fn message_events_handler(
    State(state): State<Arc<AppState>>,
    Path(bot_id): Path<String>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>, ApiError> {
    let actor = authenticate(&state.tokens, &state.directory, &headers)?;
    state.directory.authorize(&actor.id, &bot_id, true)?;

    let since = match &query.since {
        Some(raw) => Some(
            raw.parse::<DateTime<Utc>>()
                .map_err(|_| ApiError::validation("since must be an RFC3339 timestamp"))?,
        ),
        None => None,
    };

    // Subscribe before reading the backlog so nothing falls in the gap.
    let mut live = state.message_events.subscribe();
    let backlog = match since {
        Some(since) => state.conversations.list_messages_since(&bot_id, since)?,
        None => Vec::new(),
    };

    let stream = async_stream::stream! {
        for message in backlog {
            yield Event::default()
                .data(json!({"type": "message_created", "message": message}).to_string());
        }

        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await; // first tick is immediate; skip it
        loop {
            tokio::select! {
                event = live.recv() => match event {
                    Ok(event) if event.bot_id == bot_id => {
                        yield Event::default()
                            .data(json!({
                                "type": "message_created",
                                "message": event.message,
                            }).to_string());
                    }
                    Ok(_) => {} // other bot's message
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "event subscriber lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = ping.tick() => {
                    yield Event::default().data(json!({"type": "ping"}).to_string());
                }
            }
        }
    };

    Ok(Sse::new(stream.map(Ok::<_, Infallible>)))
}
