pub mod conversation;
pub mod enums;

pub use conversation::{Conversation, ChatMessage};
pub use enums::*;
