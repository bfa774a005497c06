use async_trait::async_trait;

use crate::error::ChannelError;
use crate::types::{ChannelStatus, OutboundMessage};

/// Common interface implemented by every platform adapter.
///
/// Implementations must be `Send + Sync` so they can be stored in a
/// [`ChannelManager`](crate::manager::ChannelManager) and driven from
/// multiple Tokio tasks. The SDK-facing side of an adapter (long polling,
/// webhook verification, event decoding) lives outside this crate; only
/// the transformation contract crosses this boundary.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Stable lowercase identifier for this platform (e.g. `"feishu"`).
    fn name(&self) -> &str;

    /// Establish the connection to the external service.
    async fn connect(&mut self) -> Result<(), ChannelError>;

    /// Gracefully close the connection.
    async fn disconnect(&mut self) -> Result<(), ChannelError>;

    /// Deliver a single reply to the platform.
    ///
    /// `&self` on purpose: a connected adapter sends concurrently without
    /// a mutable borrow.
    async fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError>;

    /// Current runtime status without blocking.
    fn status(&self) -> ChannelStatus;
}
