pub mod adapter;
pub mod error;
pub mod intake;
pub mod manager;
pub mod types;

pub use adapter::ChannelAdapter;
pub use error::ChannelError;
pub use intake::{extract_reply_text, Intake, IntakeOutcome};
pub use manager::ChannelManager;
pub use types::{ChannelStatus, InboundMessage, OutboundMessage};
