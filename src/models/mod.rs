pub mod identity;
pub mod message;

pub use identity::{Identity, Role, Suspension};
pub use message::{
    ConversationSummary, ConversationView, Message, MessageView, OverviewEntry,
};
