//! Turn scheduling: whose turn it is and whether generation may proceed.

use crate::conversation::{ConversationRecord, ConversationStatus};

pub struct TurnScheduler;

impl TurnScheduler {
    /// Generation may proceed only while the conversation is running and no
    /// spoken playback is outstanding. An armed TTS gate blocks
    /// unconditionally.
    pub fn can_generate(record: &ConversationRecord) -> bool {
        record.status == ConversationStatus::Running && !record.waiting_for_tts_end_signal
    }

    /// Flips the turn between the two agents and refreshes `last_activity`.
    ///
    /// Only ever invoked from the conversation's owning task, which is what
    /// makes the toggle atomic with respect to command delivery.
    pub fn toggle(record: &mut ConversationRecord) {
        record.turn = record.turn.other();
        record.touch();
    }
}
