//! The TTS gate: pauses turn progression until spoken playback of the last
//! utterance is acknowledged.

use crate::conversation::ConversationRecord;
use crate::types::MessageId;

/// Gate state. While armed it records which message must be acknowledged;
/// a signal for any other message never clears it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtsGate {
    #[default]
    Open,
    Armed { expected: MessageId },
}

/// Result of delivering a playback acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The gate was armed for this message and is now clear.
    Cleared,
    /// Stale, out-of-order or repeated signal; nothing changed.
    Ignored,
}

impl TtsGate {
    pub fn is_armed(&self) -> bool {
        matches!(self, TtsGate::Armed { .. })
    }

    /// Arms the gate for `message_id` and raises the blocking flag on the
    /// record.
    pub fn arm(&mut self, record: &mut ConversationRecord, message_id: MessageId) {
        *self = TtsGate::Armed {
            expected: message_id,
        };
        record.waiting_for_tts_end_signal = true;
        record.touch();
    }

    /// Delivers a playback-finished signal.
    ///
    /// Clears the gate only when armed for exactly `message_id`, recording it
    /// as the last played agent message. Acknowledging the same id a second
    /// time is a no-op, as is any mismatched id.
    pub fn acknowledge(
        &mut self,
        record: &mut ConversationRecord,
        message_id: MessageId,
    ) -> AckOutcome {
        match *self {
            TtsGate::Armed { expected } if expected == message_id => {
                *self = TtsGate::Open;
                record.waiting_for_tts_end_signal = false;
                record.last_played_agent_message_id = Some(message_id);
                record.touch();
                AckOutcome::Cleared
            }
            TtsGate::Armed { expected } => {
                tracing::debug!(
                    conversation_id = %record.id,
                    expected = %expected,
                    received = %message_id,
                    "Ignoring playback acknowledgement for unexpected message"
                );
                AckOutcome::Ignored
            }
            TtsGate::Open => {
                tracing::debug!(
                    conversation_id = %record.id,
                    received = %message_id,
                    "Ignoring playback acknowledgement, gate already open"
                );
                AckOutcome::Ignored
            }
        }
    }

    /// Clears an armed gate without an acknowledgement (timeout policy).
    /// Does not record a last played message, since playback was never
    /// confirmed. Returns the message that was being waited on.
    pub fn force_clear(&mut self, record: &mut ConversationRecord) -> Option<MessageId> {
        match *self {
            TtsGate::Armed { expected } => {
                *self = TtsGate::Open;
                record.waiting_for_tts_end_signal = false;
                record.touch();
                Some(expected)
            }
            TtsGate::Open => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SessionConfig, TtsSettings};

    fn record() -> ConversationRecord {
        ConversationRecord::new(&SessionConfig {
            agent_a_model: "model-a".to_string(),
            agent_b_model: "model-b".to_string(),
            tts_enabled: true,
            agent_a_tts: TtsSettings {
                provider: "eleven".to_string(),
                voice: Some("nova".to_string()),
            },
            agent_b_tts: TtsSettings::none(),
            language: None,
            initial_system_prompt: "prompt".to_string(),
        })
    }

    #[test]
    fn arm_raises_blocking_flag() {
        let mut gate = TtsGate::default();
        let mut r = record();
        let id = MessageId::new();

        gate.arm(&mut r, id);
        assert!(gate.is_armed());
        assert!(r.waiting_for_tts_end_signal);
    }

    #[test]
    fn expected_ack_clears_gate_and_records_last_played() {
        let mut gate = TtsGate::default();
        let mut r = record();
        let id = MessageId::new();
        gate.arm(&mut r, id);

        assert_eq!(gate.acknowledge(&mut r, id), AckOutcome::Cleared);
        assert!(!gate.is_armed());
        assert!(!r.waiting_for_tts_end_signal);
        assert_eq!(r.last_played_agent_message_id, Some(id));
    }

    #[test]
    fn mismatched_ack_never_clears_gate() {
        let mut gate = TtsGate::default();
        let mut r = record();
        let expected = MessageId::new();
        let stale = MessageId::new();
        gate.arm(&mut r, expected);

        assert_eq!(gate.acknowledge(&mut r, stale), AckOutcome::Ignored);
        assert!(gate.is_armed());
        assert!(r.waiting_for_tts_end_signal);
        assert_eq!(r.last_played_agent_message_id, None);
    }

    #[test]
    fn repeated_ack_is_idempotent() {
        let mut gate = TtsGate::default();
        let mut r = record();
        let id = MessageId::new();
        gate.arm(&mut r, id);

        assert_eq!(gate.acknowledge(&mut r, id), AckOutcome::Cleared);
        assert_eq!(gate.acknowledge(&mut r, id), AckOutcome::Ignored);
        assert!(!r.waiting_for_tts_end_signal);
        assert_eq!(r.last_played_agent_message_id, Some(id));
    }

    #[test]
    fn force_clear_does_not_record_playback() {
        let mut gate = TtsGate::default();
        let mut r = record();
        let id = MessageId::new();
        gate.arm(&mut r, id);

        assert_eq!(gate.force_clear(&mut r), Some(id));
        assert!(!gate.is_armed());
        assert!(!r.waiting_for_tts_end_signal);
        assert_eq!(r.last_played_agent_message_id, None);
        assert_eq!(gate.force_clear(&mut r), None);
    }
}
