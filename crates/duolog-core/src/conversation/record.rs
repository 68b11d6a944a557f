//! The per-conversation entity owned by a single orchestration task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::Display;

use crate::config::{SessionConfig, TtsSettings};
use crate::conversation::message::Role;
use crate::types::{ConversationId, MessageId};

/// Which agent is authorized to generate the next message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum Speaker {
    AgentA,
    AgentB,
}

impl Speaker {
    pub fn other(self) -> Self {
        match self {
            Speaker::AgentA => Speaker::AgentB,
            Speaker::AgentB => Speaker::AgentA,
        }
    }

    pub fn role(self) -> Role {
        match self {
            Speaker::AgentA => Role::AgentA,
            Speaker::AgentB => Role::AgentB,
        }
    }
}

/// Conversation lifecycle. `Stopped` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum ConversationStatus {
    Running,
    Stopped,
    Error,
}

impl ConversationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConversationStatus::Stopped | ConversationStatus::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: ConversationId,
    pub agent_a_model: String,
    pub agent_b_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub turn: Speaker,
    pub status: ConversationStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub tts_enabled: bool,
    pub agent_a_tts: TtsSettings,
    pub agent_b_tts: TtsSettings,
    pub waiting_for_tts_end_signal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_played_agent_message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_context: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub credential_versions: HashMap<String, String>,
}

impl ConversationRecord {
    /// Builds a fresh record from an accepted configuration.
    ///
    /// A new conversation always starts `Running`, with agent A to speak and
    /// the TTS gate clear. The configuration has no way to override these.
    pub fn new(config: &SessionConfig) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            agent_a_model: config.agent_a_model.clone(),
            agent_b_model: config.agent_b_model.clone(),
            language: config.language.clone(),
            turn: Speaker::AgentA,
            status: ConversationStatus::Running,
            created_at: now,
            last_activity: now,
            tts_enabled: config.tts_enabled,
            agent_a_tts: config.agent_a_tts.clone(),
            agent_b_tts: config.agent_b_tts.clone(),
            waiting_for_tts_end_signal: false,
            last_played_agent_message_id: None,
            error_message: None,
            error_context: None,
            credential_versions: HashMap::new(),
        }
    }

    /// Model bound to the agent whose turn it currently is.
    pub fn current_model(&self) -> &str {
        match self.turn {
            Speaker::AgentA => &self.agent_a_model,
            Speaker::AgentB => &self.agent_b_model,
        }
    }

    /// TTS settings of the agent whose turn it currently is.
    pub fn current_tts(&self) -> &TtsSettings {
        match self.turn {
            Speaker::AgentA => &self.agent_a_tts,
            Speaker::AgentB => &self.agent_b_tts,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Running → Stopped. Ignored once the conversation is terminal.
    pub fn set_stopped(&mut self) {
        if self.status.is_terminal() {
            tracing::warn!(
                conversation_id = %self.id,
                status = %self.status,
                "Ignoring stop on terminal conversation"
            );
            return;
        }
        self.status = ConversationStatus::Stopped;
        self.touch();
    }

    /// Running → Error, recording both the human-readable message and the
    /// machine-readable context. Ignored once terminal.
    pub fn set_error(&mut self, message: impl Into<String>, context: impl Into<String>) {
        if self.status.is_terminal() {
            tracing::warn!(
                conversation_id = %self.id,
                status = %self.status,
                "Ignoring error transition on terminal conversation"
            );
            return;
        }
        self.status = ConversationStatus::Error;
        self.error_message = Some(message.into());
        self.error_context = Some(context.into());
        self.touch();
    }
}
