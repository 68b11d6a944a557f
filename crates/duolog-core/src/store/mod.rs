//! Abstract persistence tiers.
//!
//! The ephemeral store holds in-flight stream buffers with low-latency
//! partial writes visible to subscribers before any durability guarantee.
//! The durable store holds the immutable transcript and the conversation
//! record, with per-conversation reads ordered by timestamp (ties broken by
//! append order).

mod memory;

pub use memory::{InMemoryDurableStore, InMemoryEphemeralStore};

use async_trait::async_trait;
use thiserror::Error;

use crate::conversation::{AudioRef, ConversationRecord, MessageRecord};
use crate::types::{ConversationId, MessageId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Conversation not found: {conversation_id}")]
    ConversationNotFound { conversation_id: String },

    #[error("Stream buffer not found: {message_id}")]
    StreamNotFound { message_id: String },

    #[error("Message not found: {message_id}")]
    MessageNotFound { message_id: String },

    #[error("Backend error: {message}")]
    Backend { message: String },

    #[error("Store lock poisoned: {message}")]
    LockPoisoned { message: String },
}

impl StoreError {
    pub fn conversation_not_found(conversation_id: impl ToString) -> Self {
        Self::ConversationNotFound {
            conversation_id: conversation_id.to_string(),
        }
    }

    pub fn stream_not_found(message_id: impl ToString) -> Self {
        Self::StreamNotFound {
            message_id: message_id.to_string(),
        }
    }

    pub fn message_not_found(message_id: impl ToString) -> Self {
        Self::MessageNotFound {
            message_id: message_id.to_string(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    pub fn lock_poisoned(message: impl Into<String>) -> Self {
        Self::LockPoisoned {
            message: message.into(),
        }
    }
}

/// Low-latency tier for in-flight stream buffers. No durability guarantee.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Writes a stream buffer, immediately visible to subscribers.
    async fn put_stream(
        &self,
        conversation_id: ConversationId,
        record: &MessageRecord,
    ) -> Result<(), StoreError>;

    /// Appends `delta` to the buffer's content. Called only by the single
    /// owning task for that stream.
    async fn append_chunk(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        delta: &str,
    ) -> Result<(), StoreError>;

    async fn get_stream(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Result<Option<MessageRecord>, StoreError>;

    /// Removes and returns the buffer, if present.
    async fn take_stream(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Result<Option<MessageRecord>, StoreError>;
}

/// Durable, ordered tier for finalized messages and conversation records.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn put_conversation(&self, record: &ConversationRecord) -> Result<(), StoreError>;

    async fn get_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<ConversationRecord>, StoreError>;

    /// Ordered append of a finalized message. Returns the per-conversation
    /// sequence number used to break timestamp ties.
    async fn append_message(
        &self,
        conversation_id: ConversationId,
        record: &MessageRecord,
    ) -> Result<u64, StoreError>;

    /// Messages sorted ascending by timestamp; ties broken by append order
    /// (stable). No loss, no duplication.
    async fn load_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<MessageRecord>, StoreError>;

    async fn contains_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Result<bool, StoreError>;

    /// The single sanctioned post-finalize update: attaches the audio
    /// reference to an already-finalized message. Content, timestamp and
    /// role stay immutable.
    async fn attach_audio(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        audio: &AudioRef,
        split: bool,
    ) -> Result<(), StoreError>;
}
