pub mod envelope;
pub mod normalize;

pub use envelope::{Envelope, IdentityBlock, ModelBlock, RoundPayload, ScheduleBlock, UsableSkill};
pub use normalize::{
    normalize_message, serialize_message, ContentPart, MessageBody, NormalizedMessage, ToolCall,
};
