pub mod client;
pub mod error;
pub mod sse;

pub use client::{
    GatewayClient, HEADER_CHANNEL_IDENTITY_ID, HEADER_CURRENT_PLATFORM, HEADER_REPLY_TARGET,
    HEADER_SESSION_TOKEN,
};
pub use error::{AgentError, Result};
pub use sse::{is_done_sentinel, terminal_round, FrameScanner, SseFrame};
