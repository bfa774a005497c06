//! Round ingestion into the external memory/embeddings service.
//!
//! The service itself is out of process; only the consumed contract lives
//! here. Ingestion is always fire-and-forget from the resolver's point of
//! view — a memory failure never fails a chat round.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Memory request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Memory service returned {status}")]
    Status { status: u16 },
}

#[async_trait]
pub trait MemoryIngestor: Send + Sync {
    async fn ingest_round(
        &self,
        bot_id: &str,
        session: &str,
        messages: &[serde_json::Value],
    ) -> Result<(), MemoryError>;
}

/// POSTs completed rounds to the memory service's ingest endpoint.
pub struct HttpMemoryIngestor {
    http: reqwest::Client,
    base_url: String,
}

impl HttpMemoryIngestor {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MemoryIngestor for HttpMemoryIngestor {
    async fn ingest_round(
        &self,
        bot_id: &str,
        session: &str,
        messages: &[serde_json::Value],
    ) -> Result<(), MemoryError> {
        let response = self
            .http
            .post(format!("{}/memory/ingest", self.base_url))
            .json(&serde_json::json!({
                "botId": bot_id,
                "sessionId": session,
                "messages": messages,
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MemoryError::Status {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// Used when no memory service is configured.
pub struct NoopMemory;

#[async_trait]
impl MemoryIngestor for NoopMemory {
    async fn ingest_round(
        &self,
        _bot_id: &str,
        _session: &str,
        _messages: &[serde_json::Value],
    ) -> Result<(), MemoryError> {
        Ok(())
    }
}
