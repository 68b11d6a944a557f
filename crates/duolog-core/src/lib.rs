// Conversation orchestration core without any transport or UI dependencies

pub mod config;
pub mod conversation;
pub mod error;
pub mod finalizer;
pub mod gate;
pub mod orchestrator;
pub mod provider;
pub mod scheduler;
pub mod store;
pub mod test_utils;
pub mod types;

pub use error::{Error, Result};
