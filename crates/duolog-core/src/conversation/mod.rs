pub mod message;
pub mod record;

pub use message::{AudioRef, ImageRef, MessageRecord, Role};
pub use record::{ConversationRecord, ConversationStatus, Speaker};
