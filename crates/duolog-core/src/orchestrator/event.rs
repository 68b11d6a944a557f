//! Events published by a conversation's orchestration task.

use serde::{Deserialize, Serialize};

use crate::conversation::{AudioRef, ConversationStatus, MessageRecord, Role, Speaker};
use crate::types::MessageId;

/// Lifecycle events, broadcast to subscribers in the order they happen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConversationEvent {
    /// An agent started producing a message; the stream buffer is already
    /// visible through the ephemeral store.
    StreamStarted {
        message_id: MessageId,
        role: Role,
    },
    MessageFinalized {
        message: MessageRecord,
    },
    AudioReady {
        message_id: MessageId,
        audio: AudioRef,
    },
    TtsGateArmed {
        message_id: MessageId,
    },
    TtsGateCleared {
        message_id: MessageId,
    },
    TurnChanged {
        turn: Speaker,
    },
    StatusChanged {
        status: ConversationStatus,
    },
}

/// A text delta, broadcast separately from lifecycle events so slow
/// subscribers do not hold up the transcript feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDelta {
    pub message_id: MessageId,
    pub delta: String,
}
