//! Seams to the external generation and synthesis services.
//!
//! Concrete provider adapters live entirely outside this crate; the
//! orchestrator only sees these traits. Retry policy for generation is an
//! adapter concern, so a stream error reaching the orchestrator is treated
//! as final.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::conversation::{AudioRef, MessageRecord, Speaker};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation request failed: {0}")]
    Request(String),
    #[error("Generation stream interrupted: {0}")]
    Stream(String),
    #[error("Model not available: {0}")]
    ModelUnavailable(String),
    #[error("Cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Synthesis request failed: {0}")]
    Request(String),
    #[error("Voice not available: {voice}")]
    VoiceUnavailable { voice: String },
}

/// A lazy, finite sequence of text deltas. Consumed by exactly one task and
/// not restartable; re-invoking the provider starts generation from scratch.
pub type DeltaStream = BoxStream<'static, Result<String, GenerationError>>;

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub system_prompt: String,
    /// Which of the two agents is speaking this turn.
    pub speaker: Speaker,
    pub language: Option<String>,
    /// Finalized transcript so far, oldest first.
    pub history: Vec<MessageRecord>,
}

/// Voice binding handed to the synthesis service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceConfig {
    pub provider: String,
    pub voice: String,
    pub language: Option<String>,
}

/// Synthesis result: the audio reference plus whether the text had to be
/// split into multiple audio parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAudio {
    pub audio: AudioRef,
    pub split: bool,
}

#[async_trait]
pub trait GenerationProvider: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Requests the next reply for the current speaker. The returned stream
    /// should stop yielding promptly once `token` is cancelled.
    async fn generate(
        &self,
        request: GenerationRequest,
        token: CancellationToken,
    ) -> Result<DeltaStream, GenerationError>;
}

#[async_trait]
pub trait SynthesisProvider: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceConfig,
    ) -> Result<SynthesizedAudio, SynthesisError>;
}
