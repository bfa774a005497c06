use std::collections::HashMap;

use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::adapter::ChannelAdapter;
use crate::error::ChannelError;
use crate::types::{ChannelStatus, OutboundMessage};

/// Minimum delay between reconnect attempts (seconds).
const BACKOFF_BASE_SECS: u64 = 5;
/// Maximum delay between reconnect attempts (seconds).
const BACKOFF_MAX_SECS: u64 = 300;
/// Maximum number of reconnect attempts before giving up.
const MAX_ATTEMPTS: u32 = 10;
/// Jitter fraction applied to each delay (±10 %).
const JITTER_FRACTION: f64 = 0.10;

/// Registry of platform adapters, keyed by [`ChannelAdapter::name`].
///
/// Connecting applies exponential backoff with jitter so a flapping
/// platform does not hammer its API.
pub struct ChannelManager {
    adapters: HashMap<String, Box<dyn ChannelAdapter>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Register an adapter. Same-name registration replaces the old one.
    pub fn register(&mut self, adapter: Box<dyn ChannelAdapter>) {
        let name = adapter.name().to_string();
        info!(platform = %name, "registering channel adapter");
        self.adapters.insert(name, adapter);
    }

    pub async fn connect_all(&mut self) {
        for (name, adapter) in self.adapters.iter_mut() {
            info!(platform = %name, "connecting channel");
            if let Err(e) = connect_with_backoff(name, adapter.as_mut()).await {
                error!(platform = %name, error = %e, "channel failed to connect after retries");
            }
        }
    }

    pub async fn disconnect_all(&mut self) {
        for (name, adapter) in self.adapters.iter_mut() {
            if let Err(e) = adapter.disconnect().await {
                warn!(platform = %name, error = %e, "error while disconnecting channel");
            }
        }
    }

    /// Dispatch one constructed reply on its originating platform.
    pub async fn dispatch(&self, message: &OutboundMessage) -> Result<(), ChannelError> {
        let adapter = self
            .adapters
            .get(&message.platform)
            .ok_or_else(|| ChannelError::UnknownChannel(message.platform.clone()))?;
        adapter.send(message).await
    }

    /// Current status of every adapter, sorted by name for stable output.
    pub fn statuses(&self) -> Vec<(String, ChannelStatus)> {
        let mut result: Vec<(String, ChannelStatus)> = self
            .adapters
            .iter()
            .map(|(name, adapter)| (name.clone(), adapter.status()))
            .collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Schedule: 5 s → 10 s → 20 s → … → 300 s (cap), up to [`MAX_ATTEMPTS`] tries.
async fn connect_with_backoff(
    name: &str,
    adapter: &mut dyn ChannelAdapter,
) -> Result<(), ChannelError> {
    let mut delay_secs = BACKOFF_BASE_SECS;

    for attempt in 1..=MAX_ATTEMPTS {
        match adapter.connect().await {
            Ok(()) => {
                info!(platform = %name, attempt, "channel connected");
                return Ok(());
            }
            Err(e) if attempt == MAX_ATTEMPTS => return Err(e),
            Err(e) => {
                let total = delay_secs + jitter_secs(delay_secs);
                warn!(
                    platform = %name,
                    attempt,
                    max = MAX_ATTEMPTS,
                    error = %e,
                    retry_after_secs = total,
                    "channel connect failed, retrying with backoff"
                );
                sleep(Duration::from_secs(total)).await;
                delay_secs = (delay_secs * 2).min(BACKOFF_MAX_SECS);
            }
        }
    }

    unreachable!("backoff loop exited without returning")
}

/// Jitter offset (0 … `JITTER_FRACTION * base_secs`) as integer seconds,
/// derived from the clock's sub-second noise to avoid a rand dependency.
fn jitter_secs(base_secs: u64) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    let max_jitter = ((base_secs as f64) * JITTER_FRACTION) as u64;
    if max_jitter == 0 {
        return 0;
    }
    (nanos as u64) % max_jitter
}
