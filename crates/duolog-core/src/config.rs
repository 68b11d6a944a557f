//! Session configuration and its validator.
//!
//! A [`SessionConfig`] is the request payload a client submits to start a
//! conversation. [`validate`] runs a fixed sequence of checks so that the
//! first violation always produces the same, agent-specific message; no
//! conversation state is created until it passes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel provider name meaning TTS is disabled for an agent.
pub const TTS_PROVIDER_NONE: &str = "none";

/// Per-agent text-to-speech settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtsSettings {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

impl TtsSettings {
    pub fn none() -> Self {
        Self {
            provider: TTS_PROVIDER_NONE.to_string(),
            voice: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.provider != TTS_PROVIDER_NONE
    }
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self::none()
    }
}

/// Proposed configuration for a new conversation session.
///
/// Note that `turn`, `status` and the TTS gate flag are deliberately absent:
/// a caller cannot override the initial values of those fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub agent_a_model: String,
    pub agent_b_model: String,
    pub tts_enabled: bool,
    #[serde(default)]
    pub agent_a_tts: TtsSettings,
    #[serde(default)]
    pub agent_b_tts: TtsSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub initial_system_prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValidationError {
    #[error("Agent A model must not be empty")]
    MissingAgentAModel,
    #[error("Agent B model must not be empty")]
    MissingAgentBModel,
    #[error("Agent A has TTS enabled but no voice selected")]
    MissingAgentAVoice,
    #[error("Agent B has TTS enabled but no voice selected")]
    MissingAgentBVoice,
}

/// Validates a proposed session configuration.
///
/// Checks run in a fixed order and the first violation wins. Pure function,
/// no side effects.
pub fn validate(config: &SessionConfig) -> Result<(), ConfigValidationError> {
    if config.agent_a_model.trim().is_empty() {
        return Err(ConfigValidationError::MissingAgentAModel);
    }
    if config.agent_b_model.trim().is_empty() {
        return Err(ConfigValidationError::MissingAgentBModel);
    }
    if config.tts_enabled && config.agent_a_tts.is_enabled() && config.agent_a_tts.voice.is_none() {
        return Err(ConfigValidationError::MissingAgentAVoice);
    }
    if config.tts_enabled && config.agent_b_tts.is_enabled() && config.agent_b_tts.voice.is_none() {
        return Err(ConfigValidationError::MissingAgentBVoice);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn base_config() -> SessionConfig {
        SessionConfig {
            agent_a_model: "model-a".to_string(),
            agent_b_model: "model-b".to_string(),
            tts_enabled: false,
            agent_a_tts: TtsSettings::none(),
            agent_b_tts: TtsSettings::none(),
            language: Some("en".to_string()),
            initial_system_prompt: "You are two agents having a debate.".to_string(),
        }
    }

    fn tts(provider: &str, voice: Option<&str>) -> TtsSettings {
        TtsSettings {
            provider: provider.to_string(),
            voice: voice.map(String::from),
        }
    }

    #[test]
    fn accepts_valid_config() {
        assert_eq!(validate(&base_config()), Ok(()));
    }

    #[rstest]
    #[case("", "model-b", ConfigValidationError::MissingAgentAModel)]
    #[case("   ", "model-b", ConfigValidationError::MissingAgentAModel)]
    #[case("model-a", "", ConfigValidationError::MissingAgentBModel)]
    #[case("model-a", "\t\n", ConfigValidationError::MissingAgentBModel)]
    fn rejects_empty_models(
        #[case] agent_a: &str,
        #[case] agent_b: &str,
        #[case] expected: ConfigValidationError,
    ) {
        let mut config = base_config();
        config.agent_a_model = agent_a.to_string();
        config.agent_b_model = agent_b.to_string();
        assert_eq!(validate(&config), Err(expected));
    }

    #[test]
    fn first_violation_wins() {
        let mut config = base_config();
        config.agent_a_model = String::new();
        config.agent_b_model = String::new();
        assert_eq!(validate(&config), Err(ConfigValidationError::MissingAgentAModel));
    }

    #[test]
    fn rejects_missing_voice_when_tts_enabled() {
        let mut config = base_config();
        config.tts_enabled = true;
        config.agent_a_tts = tts("eleven", None);
        assert_eq!(validate(&config), Err(ConfigValidationError::MissingAgentAVoice));

        config.agent_a_tts = tts("eleven", Some("nova"));
        config.agent_b_tts = tts("eleven", None);
        assert_eq!(validate(&config), Err(ConfigValidationError::MissingAgentBVoice));
    }

    #[test]
    fn provider_none_needs_no_voice() {
        let mut config = base_config();
        config.tts_enabled = true;
        config.agent_a_tts = tts(TTS_PROVIDER_NONE, None);
        config.agent_b_tts = tts("eleven", Some("sage"));
        assert_eq!(validate(&config), Ok(()));
    }

    #[test]
    fn deserializing_minimal_payload_defaults_tts_off() {
        let json = r#"{
            "agent_a_model": "model-a",
            "agent_b_model": "model-b",
            "tts_enabled": false,
            "initial_system_prompt": "prompt"
        }"#;
        let config: SessionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.agent_a_tts, TtsSettings::none());
        assert_eq!(config.agent_b_tts, TtsSettings::none());
        assert!(config.language.is_none());
        assert_eq!(validate(&config), Ok(()));
    }

    #[test]
    fn tts_disabled_ignores_per_agent_fields() {
        let mut config = base_config();
        config.tts_enabled = false;
        config.agent_a_tts = tts("eleven", None);
        config.agent_b_tts = tts("eleven", None);
        assert_eq!(validate(&config), Ok(()));
    }
}
