pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::{ConversationError, Result};
pub use store::ConversationStore;
pub use types::{
    AccessMode, Conversation, ConversationKind, ConversationListing, Message, NewMessage,
    Participant, ParticipantRole, ReadAccess, ResolveChatArgs, ResolvedRoute, Route,
};
