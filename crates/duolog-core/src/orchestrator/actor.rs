//! The per-conversation actor task and its command handle.
//!
//! All conversation state (record, stream buffer, TTS gate) is owned by
//! exactly one task. External commands (stop, playback acknowledgement,
//! queries) arrive on an mpsc channel consumed only by that task, so
//! `status`, `turn` and the gate flag are never mutated by a second writer.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::conversation::{ConversationRecord, ConversationStatus, MessageRecord};
use crate::error::{Error, Result};
use crate::finalizer::{FinalizeError, MessageFinalizer};
use crate::gate::{AckOutcome, TtsGate};
use crate::provider::{
    GenerationProvider, GenerationRequest, SynthesisProvider, VoiceConfig,
};
use crate::scheduler::TurnScheduler;
use crate::store::{DurableStore, StoreError};
use crate::types::{ConversationId, MessageId};

use super::event::{ConversationEvent, StreamDelta};
use super::OrchestratorSettings;

pub(crate) const EVENT_BROADCAST_CAPACITY: usize = 256;
pub(crate) const DELTA_BROADCAST_CAPACITY: usize = 1024;
pub(crate) const CMD_CHANNEL_CAPACITY: usize = 64;

pub(crate) enum ConversationCmd {
    Stop {
        reply: oneshot::Sender<()>,
    },
    AcknowledgePlayback {
        message_id: MessageId,
        reply: oneshot::Sender<AckOutcome>,
    },
    GetRecord {
        reply: oneshot::Sender<ConversationRecord>,
    },
    GetMessages {
        reply: oneshot::Sender<std::result::Result<Vec<MessageRecord>, StoreError>>,
    },
    Subscribe {
        reply: oneshot::Sender<broadcast::Receiver<ConversationEvent>>,
    },
    SubscribeDeltas {
        reply: oneshot::Sender<broadcast::Receiver<StreamDelta>>,
    },
}

/// Client-side handle to a running conversation.
#[derive(Clone)]
pub struct ConversationHandle {
    conversation_id: ConversationId,
    cmd_tx: mpsc::Sender<ConversationCmd>,
}

impl ConversationHandle {
    pub(crate) fn new(conversation_id: ConversationId, cmd_tx: mpsc::Sender<ConversationCmd>) -> Self {
        Self {
            conversation_id,
            cmd_tx,
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Requests a stop. Resolves once the conversation reached `Stopped`,
    /// including finalization of any in-flight partial message.
    pub async fn stop(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(ConversationCmd::Stop { reply: reply_tx })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        reply_rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// Signals that spoken playback of `message_id` finished. The only way
    /// to clear the TTS gate.
    pub async fn acknowledge_playback(&self, message_id: MessageId) -> Result<AckOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(ConversationCmd::AcknowledgePlayback {
                message_id,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        reply_rx.await.map_err(|_| Error::ChannelClosed)
    }

    pub async fn record(&self) -> Result<ConversationRecord> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(ConversationCmd::GetRecord { reply: reply_tx })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        reply_rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// Finalized transcript, sorted ascending by timestamp.
    pub async fn messages(&self) -> Result<Vec<MessageRecord>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(ConversationCmd::GetMessages { reply: reply_tx })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| Error::ChannelClosed)??)
    }

    pub async fn subscribe(&self) -> Result<broadcast::Receiver<ConversationEvent>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(ConversationCmd::Subscribe { reply: reply_tx })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        reply_rx.await.map_err(|_| Error::ChannelClosed)
    }

    pub async fn subscribe_deltas(&self) -> Result<broadcast::Receiver<StreamDelta>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(ConversationCmd::SubscribeDeltas { reply: reply_tx })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        reply_rx.await.map_err(|_| Error::ChannelClosed)
    }
}

/// Outcome of one pass through a turn.
enum TurnOutcome {
    Continue,
    Finished,
}

/// How a wait on the armed gate ended.
enum GateWait {
    Cleared,
    Terminal,
    Closed,
}

#[derive(PartialEq, Eq)]
enum CommandFlow {
    Continue,
    Stopped,
}

pub(crate) struct ConversationActor {
    record: ConversationRecord,
    config: SessionConfig,
    settings: OrchestratorSettings,
    generation: Arc<dyn GenerationProvider>,
    synthesis: Arc<dyn SynthesisProvider>,
    durable: Arc<dyn DurableStore>,
    finalizer: MessageFinalizer,
    gate: TtsGate,
    event_broadcast: broadcast::Sender<ConversationEvent>,
    delta_broadcast: broadcast::Sender<StreamDelta>,
}

impl ConversationActor {
    pub(crate) fn new(
        record: ConversationRecord,
        config: SessionConfig,
        settings: OrchestratorSettings,
        generation: Arc<dyn GenerationProvider>,
        synthesis: Arc<dyn SynthesisProvider>,
        durable: Arc<dyn DurableStore>,
        finalizer: MessageFinalizer,
    ) -> Self {
        let (event_broadcast, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY);
        let (delta_broadcast, _) = broadcast::channel(DELTA_BROADCAST_CAPACITY);
        Self {
            record,
            config,
            settings,
            generation,
            synthesis,
            durable,
            finalizer,
            gate: TtsGate::default(),
            event_broadcast,
            delta_broadcast,
        }
    }

    pub(crate) async fn run(mut self, mut cmd_rx: mpsc::Receiver<ConversationCmd>) {
        tracing::debug!(conversation_id = %self.record.id, "Conversation actor started");

        loop {
            if self.record.status != ConversationStatus::Running {
                break;
            }

            // With an always-ready provider a whole turn can complete
            // without reaching the executor; yield so queued commands land.
            tokio::task::yield_now().await;

            // Commands issued between turns are handled before any new
            // generation starts.
            if !self.drain_pending_commands(&mut cmd_rx).await
                || self.record.status != ConversationStatus::Running
            {
                break;
            }

            if !TurnScheduler::can_generate(&self.record) {
                // Only an armed gate can block here; suspend until it is
                // acknowledged, times out, or the conversation stops.
                match self.wait_for_gate_clear(&mut cmd_rx).await {
                    GateWait::Cleared => continue,
                    GateWait::Terminal | GateWait::Closed => break,
                }
            }

            match self.take_turn(&mut cmd_rx).await {
                TurnOutcome::Continue => {}
                TurnOutcome::Finished => break,
            }
        }

        tracing::debug!(
            conversation_id = %self.record.id,
            status = %self.record.status,
            "Conversation actor stopped"
        );
    }

    /// One full turn: generate, stream, finalize, synthesize, wait for
    /// playback, toggle.
    async fn take_turn(&mut self, cmd_rx: &mut mpsc::Receiver<ConversationCmd>) -> TurnOutcome {
        let speaker = self.record.turn;
        let role = speaker.role();

        let history = match self.durable.load_messages(self.record.id).await {
            Ok(history) => history,
            Err(e) => {
                self.fail(
                    "failed to load conversation history",
                    format!("durable store: {e}"),
                )
                .await;
                return TurnOutcome::Finished;
            }
        };

        let request = GenerationRequest {
            model: self.record.current_model().to_string(),
            system_prompt: self.config.initial_system_prompt.clone(),
            speaker,
            language: self.record.language.clone(),
            history,
        };

        let cancel = CancellationToken::new();
        let mut stream = match self.generation.generate(request, cancel.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                self.fail(
                    "text generation failed",
                    format!("{}: {e}", self.generation.name()),
                )
                .await;
                return TurnOutcome::Finished;
            }
        };

        let message_id = match self.finalizer.begin_stream(role).await {
            Ok(id) => id,
            Err(e) => {
                self.fail("could not open message stream", format!("finalizer: {e}"))
                    .await;
                return TurnOutcome::Finished;
            }
        };
        self.emit(ConversationEvent::StreamStarted { message_id, role });

        let mut content = String::new();
        let mut stop_reply: Option<oneshot::Sender<()>> = None;
        let mut stopping = false;
        let mut stream_error = None;

        loop {
            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => match cmd {
                    Some(ConversationCmd::Stop { reply }) => {
                        // Reply is deferred until the partial message is
                        // finalized and the status flip persisted.
                        stop_reply = Some(reply);
                        stopping = true;
                        cancel.cancel();
                        break;
                    }
                    Some(cmd) => {
                        if self.handle_command(cmd).await == CommandFlow::Stopped {
                            stopping = true;
                            cancel.cancel();
                            break;
                        }
                    }
                    None => {
                        // Every handle dropped: nobody can ever stop or
                        // acknowledge us again.
                        stopping = true;
                        cancel.cancel();
                        break;
                    }
                },

                delta = stream.next() => match delta {
                    Some(Ok(chunk)) => {
                        if let Err(e) = self.finalizer.append_chunk(message_id, &chunk).await {
                            tracing::warn!(
                                conversation_id = %self.record.id,
                                message_id = %message_id,
                                error = %e,
                                "Ephemeral append failed; delta kept in memory"
                            );
                        }
                        content.push_str(&chunk);
                        let _ = self.delta_broadcast.send(StreamDelta {
                            message_id,
                            delta: chunk,
                        });
                        // An always-ready stream wins this select on every
                        // iteration; yield per chunk so the command channel
                        // is actually serviced.
                        tokio::task::yield_now().await;
                    }
                    Some(Err(e)) => {
                        stream_error = Some(e);
                        break;
                    }
                    None => break,
                },
            }
        }

        if let Some(e) = stream_error {
            // A failed generation is not committed to the transcript.
            if let Err(abandon_err) = self.finalizer.abandon(message_id).await {
                tracing::warn!(
                    conversation_id = %self.record.id,
                    message_id = %message_id,
                    error = %abandon_err,
                    "Failed to discard stream buffer"
                );
            }
            self.fail(
                "text generation failed",
                format!("{}: {e}", self.generation.name()),
            )
            .await;
            return TurnOutcome::Finished;
        }

        // Normal completion or stop: whatever content accumulated is
        // preserved, not discarded.
        let finalized = match self.finalizer.finalize(message_id, content).await {
            Ok(record) => Some(record),
            Err(FinalizeError::Duplicate { .. }) => {
                tracing::warn!(
                    conversation_id = %self.record.id,
                    message_id = %message_id,
                    "Duplicate finalization ignored"
                );
                None
            }
            Err(e) => {
                self.fail("message could not be finalized", e.to_string())
                    .await;
                if let Some(reply) = stop_reply {
                    let _ = reply.send(());
                }
                return TurnOutcome::Finished;
            }
        };

        if let Some(message) = &finalized {
            self.emit(ConversationEvent::MessageFinalized {
                message: message.clone(),
            });
        }

        if stopping {
            self.record.set_stopped();
            self.persist_record().await;
            self.emit(ConversationEvent::StatusChanged {
                status: self.record.status,
            });
            if let Some(reply) = stop_reply {
                let _ = reply.send(());
            }
            return TurnOutcome::Finished;
        }

        if let Some(message) = finalized {
            match self.speak(cmd_rx, &message).await {
                GateWait::Cleared => {}
                GateWait::Terminal | GateWait::Closed => return TurnOutcome::Finished,
            }
        }

        if self.record.status != ConversationStatus::Running {
            return TurnOutcome::Finished;
        }

        TurnScheduler::toggle(&mut self.record);
        if !self.persist_record().await {
            return TurnOutcome::Finished;
        }
        self.emit(ConversationEvent::TurnChanged {
            turn: self.record.turn,
        });
        TurnOutcome::Continue
    }

    /// Synthesizes audio for the finalized message, arms the gate and waits
    /// for the playback acknowledgement. Synthesis failures are
    /// non-fatal; the turn proceeds text-only without arming the gate.
    async fn speak(
        &mut self,
        cmd_rx: &mut mpsc::Receiver<ConversationCmd>,
        message: &MessageRecord,
    ) -> GateWait {
        let tts = self.record.current_tts();
        if !self.record.tts_enabled || !tts.is_enabled() {
            return GateWait::Cleared;
        }
        let Some(voice) = tts.voice.clone() else {
            // Unreachable for validated configs; treat like TTS off.
            return GateWait::Cleared;
        };
        let voice = VoiceConfig {
            provider: tts.provider.clone(),
            voice,
            language: self.record.language.clone(),
        };

        let synthesized = match self.synthesis.synthesize(&message.content, &voice).await {
            Ok(synthesized) => synthesized,
            Err(e) => {
                tracing::warn!(
                    conversation_id = %self.record.id,
                    message_id = %message.id,
                    provider = self.synthesis.name(),
                    error = %e,
                    "Audio synthesis failed; continuing as text-only turn"
                );
                return GateWait::Cleared;
            }
        };

        if let Err(e) = self
            .durable
            .attach_audio(
                self.record.id,
                message.id,
                &synthesized.audio,
                synthesized.split,
            )
            .await
        {
            tracing::warn!(
                conversation_id = %self.record.id,
                message_id = %message.id,
                error = %e,
                "Could not store audio reference; continuing as text-only turn"
            );
            return GateWait::Cleared;
        }
        self.emit(ConversationEvent::AudioReady {
            message_id: message.id,
            audio: synthesized.audio,
        });

        self.gate.arm(&mut self.record, message.id);
        if !self.persist_record().await {
            return GateWait::Terminal;
        }
        self.emit(ConversationEvent::TtsGateArmed {
            message_id: message.id,
        });

        self.wait_for_gate_clear(cmd_rx).await
    }

    /// Suspends until the armed gate clears. The wait is bounded by the
    /// configured acknowledgement timeout; on expiry the gate is
    /// force-cleared with a warning rather than wedging the conversation.
    async fn wait_for_gate_clear(
        &mut self,
        cmd_rx: &mut mpsc::Receiver<ConversationCmd>,
    ) -> GateWait {
        // One absolute deadline per armed period. Command traffic while
        // waiting (state polls in particular) must not extend it.
        let deadline = self
            .settings
            .ack_timeout
            .map(|limit| tokio::time::Instant::now() + limit);

        while self.record.waiting_for_tts_end_signal
            && self.record.status == ConversationStatus::Running
        {
            let cmd = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, cmd_rx.recv()).await {
                    Ok(cmd) => cmd,
                    Err(_) => {
                        let expected = self.gate.force_clear(&mut self.record);
                        tracing::warn!(
                            conversation_id = %self.record.id,
                            expected = ?expected.map(|id| id.to_string()),
                            "No playback acknowledgement before the deadline; clearing TTS gate"
                        );
                        self.persist_record().await;
                        if let Some(message_id) = expected {
                            self.emit(ConversationEvent::TtsGateCleared { message_id });
                        }
                        break;
                    }
                },
                None => cmd_rx.recv().await,
            };

            match cmd {
                Some(cmd) => {
                    if self.handle_command(cmd).await == CommandFlow::Stopped {
                        return GateWait::Terminal;
                    }
                }
                None => {
                    self.record.set_stopped();
                    self.persist_record().await;
                    self.emit(ConversationEvent::StatusChanged {
                        status: self.record.status,
                    });
                    return GateWait::Closed;
                }
            }
        }

        if self.record.status == ConversationStatus::Running {
            GateWait::Cleared
        } else {
            GateWait::Terminal
        }
    }

    /// Handles one command outside of streaming. Returns whether the
    /// conversation was stopped.
    async fn handle_command(&mut self, cmd: ConversationCmd) -> CommandFlow {
        match cmd {
            ConversationCmd::Stop { reply } => {
                self.record.set_stopped();
                self.persist_record().await;
                self.emit(ConversationEvent::StatusChanged {
                    status: self.record.status,
                });
                let _ = reply.send(());
                CommandFlow::Stopped
            }
            ConversationCmd::AcknowledgePlayback { message_id, reply } => {
                let outcome = self.gate.acknowledge(&mut self.record, message_id);
                let _ = reply.send(outcome);
                if outcome == AckOutcome::Cleared {
                    self.persist_record().await;
                    self.emit(ConversationEvent::TtsGateCleared { message_id });
                }
                CommandFlow::Continue
            }
            ConversationCmd::GetRecord { reply } => {
                let _ = reply.send(self.record.clone());
                CommandFlow::Continue
            }
            ConversationCmd::GetMessages { reply } => {
                let _ = reply.send(self.durable.load_messages(self.record.id).await);
                CommandFlow::Continue
            }
            ConversationCmd::Subscribe { reply } => {
                let _ = reply.send(self.event_broadcast.subscribe());
                CommandFlow::Continue
            }
            ConversationCmd::SubscribeDeltas { reply } => {
                let _ = reply.send(self.delta_broadcast.subscribe());
                CommandFlow::Continue
            }
        }
    }

    /// Handles all commands that queued up since the last suspension point.
    /// Returns false when the conversation stopped or the channel closed.
    async fn drain_pending_commands(
        &mut self,
        cmd_rx: &mut mpsc::Receiver<ConversationCmd>,
    ) -> bool {
        loop {
            match cmd_rx.try_recv() {
                Ok(cmd) => {
                    if self.handle_command(cmd).await == CommandFlow::Stopped {
                        return false;
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => return true,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.record.set_stopped();
                    self.persist_record().await;
                    self.emit(ConversationEvent::StatusChanged {
                        status: self.record.status,
                    });
                    return false;
                }
            }
        }
    }

    /// Persists the record; a failed write on a running conversation is an
    /// unrecoverable persistence failure and transitions it to Error.
    async fn persist_record(&mut self) -> bool {
        if let Err(e) = self.durable.put_conversation(&self.record).await {
            tracing::error!(
                conversation_id = %self.record.id,
                error = %e,
                "Failed to persist conversation record"
            );
            if self.record.status == ConversationStatus::Running {
                self.record.set_error(
                    "conversation state could not be persisted",
                    format!("durable store: {e}"),
                );
                self.emit(ConversationEvent::StatusChanged {
                    status: self.record.status,
                });
            }
            return false;
        }
        true
    }

    /// Terminal failure: records message and context, persists best-effort
    /// and emits the status change.
    async fn fail(&mut self, message: &str, context: String) {
        tracing::error!(
            conversation_id = %self.record.id,
            context = %context,
            "{message}"
        );
        self.record.set_error(message, context);
        if let Err(e) = self.durable.put_conversation(&self.record).await {
            tracing::error!(
                conversation_id = %self.record.id,
                error = %e,
                "Failed to persist error status"
            );
        }
        self.emit(ConversationEvent::StatusChanged {
            status: self.record.status,
        });
    }

    fn emit(&self, event: ConversationEvent) {
        let _ = self.event_broadcast.send(event);
    }
}
