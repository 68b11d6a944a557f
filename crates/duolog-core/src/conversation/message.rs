//! Message types for the conversation transcript.
//!
//! A [`MessageRecord`] exists in two phases: a stream buffer
//! (`is_streaming = true`, no timestamp) while an agent is still producing
//! it, and a finalized record with its timestamp assigned exactly once.
//! The identifier is the same in both phases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::types::MessageId;

/// Author of a message in the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum Role {
    AgentA,
    AgentB,
    User,
    System,
}

/// Reference to synthesized audio for a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioRef {
    pub url: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Reference to a generated image attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    /// None while the message is still streaming.
    pub timestamp: Option<DateTime<Utc>>,
    pub is_streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioRef>,
    /// Set when the audio had to be split into multiple parts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_split: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_error: Option<String>,
}

impl MessageRecord {
    /// Creates an empty stream buffer for a message an agent is about to
    /// produce. `is_streaming` and the missing timestamp go together.
    pub fn stream_buffer(role: Role) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: String::new(),
            timestamp: None,
            is_streaming: true,
            audio: None,
            audio_split: None,
            image: None,
            image_error: None,
        }
    }

    /// Creates an already-finalized record, e.g. the seeded system prompt.
    pub fn finalized(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            timestamp: Some(Utc::now()),
            is_streaming: false,
            audio: None,
            audio_split: None,
            image: None,
            image_error: None,
        }
    }

    /// Consumes a stream buffer and produces the immutable finalized record,
    /// keeping the identifier and role. The timestamp is assigned here,
    /// exactly once.
    pub fn into_finalized(self, content: String) -> Self {
        Self {
            content,
            timestamp: Some(Utc::now()),
            is_streaming: false,
            ..self
        }
    }

    pub fn is_finalized(&self) -> bool {
        !self.is_streaming
    }
}
