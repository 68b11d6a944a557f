//! In-memory reference implementations of both persistence tiers.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::conversation::{AudioRef, ConversationRecord, MessageRecord};
use crate::types::{ConversationId, MessageId};

use super::{DurableStore, EphemeralStore, StoreError};

#[derive(Default)]
pub struct InMemoryEphemeralStore {
    streams: RwLock<HashMap<ConversationId, HashMap<MessageId, MessageRecord>>>,
}

impl InMemoryEphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EphemeralStore for InMemoryEphemeralStore {
    async fn put_stream(
        &self,
        conversation_id: ConversationId,
        record: &MessageRecord,
    ) -> Result<(), StoreError> {
        let mut streams = self
            .streams
            .write()
            .map_err(|_| StoreError::lock_poisoned("streams"))?;
        streams
            .entry(conversation_id)
            .or_default()
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn append_chunk(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        delta: &str,
    ) -> Result<(), StoreError> {
        let mut streams = self
            .streams
            .write()
            .map_err(|_| StoreError::lock_poisoned("streams"))?;
        let record = streams
            .get_mut(&conversation_id)
            .and_then(|s| s.get_mut(&message_id))
            .ok_or_else(|| StoreError::stream_not_found(message_id))?;
        record.content.push_str(delta);
        Ok(())
    }

    async fn get_stream(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Result<Option<MessageRecord>, StoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| StoreError::lock_poisoned("streams"))?;
        Ok(streams
            .get(&conversation_id)
            .and_then(|s| s.get(&message_id))
            .cloned())
    }

    async fn take_stream(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Result<Option<MessageRecord>, StoreError> {
        let mut streams = self
            .streams
            .write()
            .map_err(|_| StoreError::lock_poisoned("streams"))?;
        Ok(streams
            .get_mut(&conversation_id)
            .and_then(|s| s.remove(&message_id)))
    }
}

#[derive(Default)]
pub struct InMemoryDurableStore {
    conversations: RwLock<HashMap<ConversationId, ConversationRecord>>,
    // Append order doubles as the tie-breaking sequence.
    messages: RwLock<HashMap<ConversationId, Vec<(u64, MessageRecord)>>>,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn put_conversation(&self, record: &ConversationRecord) -> Result<(), StoreError> {
        let mut conversations = self
            .conversations
            .write()
            .map_err(|_| StoreError::lock_poisoned("conversations"))?;
        conversations.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<ConversationRecord>, StoreError> {
        let conversations = self
            .conversations
            .read()
            .map_err(|_| StoreError::lock_poisoned("conversations"))?;
        Ok(conversations.get(&conversation_id).cloned())
    }

    async fn append_message(
        &self,
        conversation_id: ConversationId,
        record: &MessageRecord,
    ) -> Result<u64, StoreError> {
        let mut messages = self
            .messages
            .write()
            .map_err(|_| StoreError::lock_poisoned("messages"))?;
        let entries = messages.entry(conversation_id).or_default();
        let seq = entries.last().map_or(0, |(s, _)| s + 1);
        entries.push((seq, record.clone()));
        Ok(seq)
    }

    async fn load_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let messages = self
            .messages
            .read()
            .map_err(|_| StoreError::lock_poisoned("messages"))?;
        let mut entries = messages.get(&conversation_id).cloned().unwrap_or_default();
        // Entries are already in append order; the stable sort keeps that
        // order for equal timestamps.
        entries.sort_by(|(_, a), (_, b)| a.timestamp.cmp(&b.timestamp));
        Ok(entries.into_iter().map(|(_, record)| record).collect())
    }

    async fn contains_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Result<bool, StoreError> {
        let messages = self
            .messages
            .read()
            .map_err(|_| StoreError::lock_poisoned("messages"))?;
        Ok(messages
            .get(&conversation_id)
            .is_some_and(|entries| entries.iter().any(|(_, r)| r.id == message_id)))
    }

    async fn attach_audio(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        audio: &AudioRef,
        split: bool,
    ) -> Result<(), StoreError> {
        let mut messages = self
            .messages
            .write()
            .map_err(|_| StoreError::lock_poisoned("messages"))?;
        let record = messages
            .get_mut(&conversation_id)
            .and_then(|entries| entries.iter_mut().find(|(_, r)| r.id == message_id))
            .map(|(_, r)| r)
            .ok_or_else(|| StoreError::message_not_found(message_id))?;
        record.audio = Some(audio.clone());
        record.audio_split = Some(split);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn ephemeral_append_accumulates_content() {
        let store = InMemoryEphemeralStore::new();
        let conversation_id = ConversationId::new();
        let buffer = MessageRecord::stream_buffer(Role::AgentA);
        let message_id = buffer.id;

        store.put_stream(conversation_id, &buffer).await.unwrap();
        store
            .append_chunk(conversation_id, message_id, "Hello")
            .await
            .unwrap();
        store
            .append_chunk(conversation_id, message_id, ", world")
            .await
            .unwrap();

        let streamed = store
            .get_stream(conversation_id, message_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(streamed.content, "Hello, world");
        assert!(streamed.is_streaming);

        let taken = store
            .take_stream(conversation_id, message_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(taken.content, "Hello, world");
        assert!(
            store
                .get_stream(conversation_id, message_id)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn ephemeral_append_to_unknown_stream_fails() {
        let store = InMemoryEphemeralStore::new();
        let result = store
            .append_chunk(ConversationId::new(), MessageId::new(), "x")
            .await;
        assert!(matches!(result, Err(StoreError::StreamNotFound { .. })));
    }

    #[tokio::test]
    async fn durable_messages_sorted_by_timestamp_with_stable_ties() {
        let store = InMemoryDurableStore::new();
        let conversation_id = ConversationId::new();
        let base = Utc::now();

        // Appended out of timestamp order, with one tie.
        let mut late = MessageRecord::finalized(Role::AgentB, "late");
        late.timestamp = Some(base + Duration::seconds(10));
        let mut tie_first = MessageRecord::finalized(Role::AgentA, "tie-first");
        tie_first.timestamp = Some(base);
        let mut tie_second = MessageRecord::finalized(Role::AgentB, "tie-second");
        tie_second.timestamp = Some(base);

        store.append_message(conversation_id, &late).await.unwrap();
        store
            .append_message(conversation_id, &tie_first)
            .await
            .unwrap();
        store
            .append_message(conversation_id, &tie_second)
            .await
            .unwrap();

        let loaded = store.load_messages(conversation_id).await.unwrap();
        let contents: Vec<_> = loaded.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["tie-first", "tie-second", "late"]);

        // No loss, no duplication of identifiers.
        let mut ids: Vec<_> = loaded.iter().map(|m| m.id).collect();
        ids.sort_by_key(|id| *id.as_uuid());
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test]
    async fn durable_sequence_numbers_increase_per_conversation() {
        let store = InMemoryDurableStore::new();
        let a = ConversationId::new();
        let b = ConversationId::new();

        for i in 0..3 {
            let seq = store
                .append_message(a, &MessageRecord::finalized(Role::AgentA, format!("m{i}")))
                .await
                .unwrap();
            assert_eq!(seq, i);
        }
        let seq = store
            .append_message(b, &MessageRecord::finalized(Role::AgentB, "other"))
            .await
            .unwrap();
        assert_eq!(seq, 0);
    }

    #[tokio::test]
    async fn attach_audio_touches_audio_fields_only() {
        let store = InMemoryDurableStore::new();
        let conversation_id = ConversationId::new();
        let record = MessageRecord::finalized(Role::AgentA, "spoken text");
        let message_id = record.id;
        let timestamp = record.timestamp;
        store
            .append_message(conversation_id, &record)
            .await
            .unwrap();

        let audio = AudioRef {
            url: "audio/1.mp3".to_string(),
            mime_type: "audio/mpeg".to_string(),
            duration_ms: Some(1800),
        };
        store
            .attach_audio(conversation_id, message_id, &audio, false)
            .await
            .unwrap();

        let loaded = &store.load_messages(conversation_id).await.unwrap()[0];
        assert_eq!(loaded.audio.as_ref(), Some(&audio));
        assert_eq!(loaded.audio_split, Some(false));
        assert_eq!(loaded.content, "spoken text");
        assert_eq!(loaded.timestamp, timestamp);
    }

    #[tokio::test]
    async fn attach_audio_to_unknown_message_fails() {
        let store = InMemoryDurableStore::new();
        let audio = AudioRef {
            url: "audio/none.mp3".to_string(),
            mime_type: "audio/mpeg".to_string(),
            duration_ms: None,
        };
        let result = store
            .attach_audio(ConversationId::new(), MessageId::new(), &audio, false)
            .await;
        assert!(matches!(result, Err(StoreError::MessageNotFound { .. })));
    }

    #[tokio::test]
    async fn conversation_upsert_roundtrip() {
        use crate::config::{SessionConfig, TtsSettings};

        let store = InMemoryDurableStore::new();
        let mut record = ConversationRecord::new(&SessionConfig {
            agent_a_model: "model-a".to_string(),
            agent_b_model: "model-b".to_string(),
            tts_enabled: false,
            agent_a_tts: TtsSettings::none(),
            agent_b_tts: TtsSettings::none(),
            language: None,
            initial_system_prompt: "prompt".to_string(),
        });

        store.put_conversation(&record).await.unwrap();
        record.set_stopped();
        store.put_conversation(&record).await.unwrap();

        let loaded = store.get_conversation(record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, record.status);
    }
}
