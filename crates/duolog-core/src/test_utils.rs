//! Scripted providers for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::conversation::AudioRef;
use crate::provider::{
    DeltaStream, GenerationError, GenerationProvider, GenerationRequest, SynthesisError,
    SynthesisProvider, SynthesizedAudio, VoiceConfig,
};

#[derive(Debug, Clone)]
pub enum ScriptedChunk {
    Delta(String),
    /// The stream yields this error and ends.
    Fail(String),
}

/// Generation provider that replays prepared scripts, cycling through them
/// one per `generate` call.
pub struct ScriptedGeneration {
    scripts: Vec<Vec<ScriptedChunk>>,
    chunk_delay: Option<Duration>,
    fail_request: Option<String>,
    calls: AtomicUsize,
}

impl ScriptedGeneration {
    pub fn new<S: Into<String> + Clone>(scripts: Vec<Vec<S>>) -> Self {
        let scripts = scripts
            .into_iter()
            .map(|script| {
                script
                    .into_iter()
                    .map(|chunk| ScriptedChunk::Delta(chunk.into()))
                    .collect()
            })
            .collect();
        Self {
            scripts,
            chunk_delay: None,
            fail_request: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_chunks(scripts: Vec<Vec<ScriptedChunk>>) -> Self {
        Self {
            scripts,
            chunk_delay: None,
            fail_request: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Every `generate` call fails before producing a stream.
    pub fn failing_request(reason: impl Into<String>) -> Self {
        Self {
            scripts: Vec::new(),
            chunk_delay: None,
            fail_request: Some(reason.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleeps before each chunk, giving tests a window to interleave
    /// commands with the stream.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Number of `generate` calls, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationProvider for ScriptedGeneration {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn generate(
        &self,
        _request: GenerationRequest,
        token: CancellationToken,
    ) -> Result<DeltaStream, GenerationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.fail_request {
            return Err(GenerationError::Request(reason.clone()));
        }
        if self.scripts.is_empty() {
            return Ok(Box::pin(tokio_stream::empty::<Result<String, GenerationError>>()));
        }

        let script = self.scripts[call % self.scripts.len()].clone();
        let delay = self.chunk_delay;

        Ok(Box::pin(async_stream::stream! {
            for chunk in script {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if token.is_cancelled() {
                    break;
                }
                match chunk {
                    ScriptedChunk::Delta(text) => yield Ok(text),
                    ScriptedChunk::Fail(reason) => {
                        yield Err(GenerationError::Stream(reason));
                        break;
                    }
                }
            }
        }))
    }
}

/// Synthesis provider that fabricates audio references, or fails every call.
pub struct ScriptedSynthesis {
    fail: Option<String>,
    calls: AtomicUsize,
}

impl ScriptedSynthesis {
    pub fn new() -> Self {
        Self {
            fail: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            fail: Some(reason.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedSynthesis {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SynthesisProvider for ScriptedSynthesis {
    fn name(&self) -> &'static str {
        "scripted-tts"
    }

    async fn synthesize(
        &self,
        text: &str,
        _voice: &VoiceConfig,
    ) -> Result<SynthesizedAudio, SynthesisError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.fail {
            return Err(SynthesisError::Request(reason.clone()));
        }
        Ok(SynthesizedAudio {
            audio: AudioRef {
                url: format!("memory://tts/{call}.mp3"),
                mime_type: "audio/mpeg".to_string(),
                duration_ms: Some(text.len() as u64 * 60),
            },
            split: false,
        })
    }
}
