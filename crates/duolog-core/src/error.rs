use thiserror::Error;

use crate::config::ConfigValidationError;
use crate::finalizer::FinalizeError;
use crate::provider::{GenerationError, SynthesisError};
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigValidationError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Finalize(#[from] FinalizeError),
    #[error("Conversation channel closed")]
    ChannelClosed,
}
