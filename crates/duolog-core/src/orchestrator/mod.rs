//! Top-level driver for one conversation.
//!
//! [`spawn_conversation`] validates the configuration, creates the record
//! (always `Running`, agent A first, gate clear), seeds the system prompt
//! into the durable transcript and starts the owning actor task. Everything
//! afterwards goes through the returned [`ConversationHandle`].

mod actor;
mod event;


pub use actor::ConversationHandle;
pub use event::{ConversationEvent, StreamDelta};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::{self, SessionConfig};
use crate::conversation::{ConversationRecord, MessageRecord, Role};
use crate::error::Result;
use crate::finalizer::MessageFinalizer;
use crate::provider::{GenerationProvider, SynthesisProvider};
use crate::store::{DurableStore, EphemeralStore};

use actor::{ConversationActor, CMD_CHANNEL_CAPACITY};

/// Tuning knobs for the orchestration loop.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// How long an armed TTS gate waits for a playback acknowledgement.
    /// On expiry the gate is cleared with a warning and the conversation
    /// proceeds; a disconnected client must not wedge it. `None` waits
    /// indefinitely.
    pub ack_timeout: Option<Duration>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            ack_timeout: Some(Duration::from_secs(120)),
        }
    }
}

/// Validates `config` and, if accepted, starts the conversation's owning
/// task. Validation errors are returned before any conversation state
/// exists.
pub async fn spawn_conversation(
    config: SessionConfig,
    generation: Arc<dyn GenerationProvider>,
    synthesis: Arc<dyn SynthesisProvider>,
    ephemeral: Arc<dyn EphemeralStore>,
    durable: Arc<dyn DurableStore>,
    settings: OrchestratorSettings,
) -> Result<ConversationHandle> {
    config::validate(&config)?;

    let record = ConversationRecord::new(&config);
    durable.put_conversation(&record).await?;

    if !config.initial_system_prompt.trim().is_empty() {
        let system = MessageRecord::finalized(Role::System, config.initial_system_prompt.clone());
        durable.append_message(record.id, &system).await?;
    }

    let conversation_id = record.id;
    let finalizer = MessageFinalizer::new(conversation_id, ephemeral, durable.clone());
    let actor = ConversationActor::new(
        record,
        config,
        settings,
        generation,
        synthesis,
        durable,
        finalizer,
    );

    let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
    tokio::spawn(actor.run(cmd_rx));

    tracing::info!(conversation_id = %conversation_id, "Conversation started");
    Ok(ConversationHandle::new(conversation_id, cmd_tx))
}
