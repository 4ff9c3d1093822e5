//! Core data models shared by the store, the completion session, and the
//! session controller.
//!
//! These types are the units that flow between the transcript store, the
//! model provider, and whatever renders the conversation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Who authored a turn.
///
/// Serialized lowercase (`"user"` / `"model"`), which is both the wire shape
/// of `/api/messages` and the role vocabulary the provider expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not one of the two known roles.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid role '{0}': expected 'user' or 'model'")]
pub struct InvalidRole(pub String);

impl FromStr for Role {
    type Err = InvalidRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "model" => Ok(Role::Model),
            other => Err(InvalidRole(other.to_string())),
        }
    }
}

/// One chat message.
///
/// Turns read from the store are never ephemeral. Inside a live conversation
/// the controller marks visible-only turns (error bubbles, replies that were
/// not committed) as ephemeral; those are never persisted and never sent back
/// to the provider as history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub ephemeral: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            ephemeral: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self::new(Role::Model, content)
    }

    /// A model turn that is shown but never written to the store.
    pub fn ephemeral_model(content: impl Into<String>) -> Self {
        Self {
            ephemeral: true,
            ..Self::model(content)
        }
    }
}

pub const DEFAULT_AGENT_NAME: &str = "Nexus";
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful, intelligent AI assistant named Nexus. You provide clear, concise, and accurate information.";
pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// User-adjustable parameters that shape a reply.
///
/// Lives only in controller memory; a restart resets it to the configured
/// defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentConfig {
    pub name: String,
    pub system_instruction: String,
    pub model: String,
    pub temperature: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_AGENT_NAME.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

impl AgentConfig {
    /// Sets the temperature, clamped to `[0, 1]` the way the settings slider
    /// bounds it.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = clamp_temperature(temperature);
        self
    }

    /// Model identifier to send, falling back to [`DEFAULT_MODEL`] when blank.
    pub fn effective_model(&self) -> &str {
        let model = self.model.trim();
        if model.is_empty() {
            DEFAULT_MODEL
        } else {
            model
        }
    }
}

pub fn clamp_temperature(temperature: f32) -> f32 {
    if temperature.is_nan() {
        DEFAULT_TEMPERATURE
    } else {
        temperature.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_known_values_only() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!("model".parse::<Role>().unwrap(), Role::Model);
        assert_eq!(
            "assistant".parse::<Role>().unwrap_err(),
            InvalidRole("assistant".to_string())
        );
    }

    #[test]
    fn turn_wire_shape_omits_ephemeral_flag() {
        let json = serde_json::to_value(Turn::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));

        let parsed: Turn = serde_json::from_str(r#"{"role":"model","content":"ok"}"#).unwrap();
        assert_eq!(parsed, Turn::model("ok"));
    }

    #[test]
    fn temperature_is_clamped() {
        assert_eq!(AgentConfig::default().with_temperature(1.7).temperature, 1.0);
        assert_eq!(AgentConfig::default().with_temperature(-0.2).temperature, 0.0);
        assert_eq!(
            AgentConfig::default().with_temperature(f32::NAN).temperature,
            DEFAULT_TEMPERATURE
        );
    }

    #[test]
    fn blank_model_falls_back_to_default() {
        let agent = AgentConfig {
            model: "  ".to_string(),
            ..AgentConfig::default()
        };
        assert_eq!(agent.effective_model(), DEFAULT_MODEL);
    }
}
