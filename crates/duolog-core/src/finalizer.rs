//! Stream-buffer lifecycle: begin, append, finalize exactly once.

use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

use crate::conversation::{MessageRecord, Role};
use crate::store::{DurableStore, EphemeralStore, StoreError};
use crate::types::{ConversationId, MessageId};

#[derive(Debug, Error)]
pub enum FinalizeError {
    /// At most one non-finalized stream buffer may exist per conversation.
    #[error("A message stream is already in progress for conversation {conversation_id}")]
    StreamInProgress { conversation_id: ConversationId },

    /// Guards the double-finalize race. Callers log this and move on; the
    /// already-finalized record is untouched.
    #[error("Message {message_id} was already finalized")]
    Duplicate { message_id: MessageId },

    #[error("Unknown stream buffer: {message_id}")]
    UnknownStream { message_id: MessageId },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Manages the ephemeral → durable lifecycle of one conversation's messages.
///
/// Owned by the conversation's orchestration task; all calls come from that
/// single task, so appends to a stream are never concurrent.
pub struct MessageFinalizer {
    conversation_id: ConversationId,
    ephemeral: Arc<dyn EphemeralStore>,
    durable: Arc<dyn DurableStore>,
    active_stream: Option<MessageId>,
    finalized: HashSet<MessageId>,
}

impl MessageFinalizer {
    pub fn new(
        conversation_id: ConversationId,
        ephemeral: Arc<dyn EphemeralStore>,
        durable: Arc<dyn DurableStore>,
    ) -> Self {
        Self {
            conversation_id,
            ephemeral,
            durable,
            active_stream: None,
            finalized: HashSet::new(),
        }
    }

    /// Creates the stream buffer for a message the given role is about to
    /// produce. The buffer is immediately visible through the ephemeral
    /// store.
    pub async fn begin_stream(&mut self, role: Role) -> Result<MessageId, FinalizeError> {
        if self.active_stream.is_some() {
            return Err(FinalizeError::StreamInProgress {
                conversation_id: self.conversation_id,
            });
        }
        let buffer = MessageRecord::stream_buffer(role);
        self.ephemeral
            .put_stream(self.conversation_id, &buffer)
            .await?;
        self.active_stream = Some(buffer.id);
        tracing::debug!(
            conversation_id = %self.conversation_id,
            message_id = %buffer.id,
            role = %role,
            "Stream buffer opened"
        );
        Ok(buffer.id)
    }

    /// Appends a delta to the active stream buffer. No durability guarantee.
    pub async fn append_chunk(
        &mut self,
        message_id: MessageId,
        delta: &str,
    ) -> Result<(), FinalizeError> {
        if self.active_stream != Some(message_id) {
            return Err(FinalizeError::UnknownStream { message_id });
        }
        self.ephemeral
            .append_chunk(self.conversation_id, message_id, delta)
            .await?;
        Ok(())
    }

    /// Converts the stream buffer into an immutable durable record with the
    /// same identifier, setting the timestamp exactly once.
    ///
    /// A second call for the same id returns [`FinalizeError::Duplicate`]
    /// and leaves the stored record untouched.
    pub async fn finalize(
        &mut self,
        message_id: MessageId,
        content: String,
    ) -> Result<MessageRecord, FinalizeError> {
        if self.finalized.contains(&message_id)
            || self
                .durable
                .contains_message(self.conversation_id, message_id)
                .await?
        {
            return Err(FinalizeError::Duplicate { message_id });
        }

        let buffer = self
            .ephemeral
            .take_stream(self.conversation_id, message_id)
            .await?
            .ok_or(FinalizeError::UnknownStream { message_id })?;

        let record = buffer.into_finalized(content);
        self.durable
            .append_message(self.conversation_id, &record)
            .await?;
        self.finalized.insert(message_id);
        if self.active_stream == Some(message_id) {
            self.active_stream = None;
        }
        tracing::debug!(
            conversation_id = %self.conversation_id,
            message_id = %message_id,
            bytes = record.content.len(),
            "Message finalized"
        );
        Ok(record)
    }

    /// Discards a stream buffer that will never be finalized, e.g. after a
    /// generation failure.
    pub async fn abandon(&mut self, message_id: MessageId) -> Result<(), FinalizeError> {
        self.ephemeral
            .take_stream(self.conversation_id, message_id)
            .await?;
        if self.active_stream == Some(message_id) {
            self.active_stream = None;
        }
        tracing::debug!(
            conversation_id = %self.conversation_id,
            message_id = %message_id,
            "Stream buffer abandoned"
        );
        Ok(())
    }

    pub fn active_stream(&self) -> Option<MessageId> {
        self.active_stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryDurableStore, InMemoryEphemeralStore};

    fn finalizer() -> (MessageFinalizer, Arc<InMemoryDurableStore>, ConversationId) {
        let conversation_id = ConversationId::new();
        let durable = Arc::new(InMemoryDurableStore::new());
        let finalizer = MessageFinalizer::new(
            conversation_id,
            Arc::new(InMemoryEphemeralStore::new()),
            durable.clone(),
        );
        (finalizer, durable, conversation_id)
    }

    #[tokio::test]
    async fn begin_append_finalize_scenario() {
        let (mut finalizer, durable, conversation_id) = finalizer();

        let message_id = finalizer.begin_stream(Role::AgentA).await.unwrap();
        finalizer.append_chunk(message_id, "Hello").await.unwrap();
        finalizer.append_chunk(message_id, ", world").await.unwrap();

        let record = finalizer
            .finalize(message_id, "Hello, world".to_string())
            .await
            .unwrap();
        assert_eq!(record.id, message_id);
        assert_eq!(record.content, "Hello, world");
        assert!(!record.is_streaming);
        assert!(record.timestamp.is_some());

        let stored = durable.load_messages(conversation_id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, message_id);
    }

    #[tokio::test]
    async fn second_finalize_is_duplicate_and_no_op() {
        let (mut finalizer, durable, conversation_id) = finalizer();

        let message_id = finalizer.begin_stream(Role::AgentB).await.unwrap();
        finalizer.append_chunk(message_id, "one").await.unwrap();
        finalizer
            .finalize(message_id, "one".to_string())
            .await
            .unwrap();

        let result = finalizer.finalize(message_id, "two".to_string()).await;
        assert!(matches!(result, Err(FinalizeError::Duplicate { .. })));

        let stored = durable.load_messages(conversation_id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "one");
    }

    #[tokio::test]
    async fn only_one_stream_buffer_at_a_time() {
        let (mut finalizer, _, _) = finalizer();

        let first = finalizer.begin_stream(Role::AgentA).await.unwrap();
        let result = finalizer.begin_stream(Role::AgentB).await;
        assert!(matches!(result, Err(FinalizeError::StreamInProgress { .. })));

        finalizer.finalize(first, String::new()).await.unwrap();
        finalizer.begin_stream(Role::AgentB).await.unwrap();
    }

    #[tokio::test]
    async fn append_to_unknown_stream_is_rejected() {
        let (mut finalizer, _, _) = finalizer();
        let result = finalizer.append_chunk(MessageId::new(), "x").await;
        assert!(matches!(result, Err(FinalizeError::UnknownStream { .. })));
    }

    #[tokio::test]
    async fn abandon_clears_active_stream_without_durable_write() {
        let (mut finalizer, durable, conversation_id) = finalizer();

        let message_id = finalizer.begin_stream(Role::AgentA).await.unwrap();
        finalizer.append_chunk(message_id, "partial").await.unwrap();
        finalizer.abandon(message_id).await.unwrap();

        assert!(finalizer.active_stream().is_none());
        assert!(
            durable
                .load_messages(conversation_id)
                .await
                .unwrap()
                .is_empty()
        );
        finalizer.begin_stream(Role::AgentB).await.unwrap();
    }
}
