use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::credential::CredentialSource;
use crate::models::{
    AgentConfig, DEFAULT_AGENT_NAME, DEFAULT_MODEL, DEFAULT_SYSTEM_INSTRUCTION,
    DEFAULT_TEMPERATURE,
};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub agent: AgentDefaults,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/nexus.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Directory with a built browser UI; served with an `index.html` fallback.
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            static_dir: None,
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/models".to_string()
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

impl ProviderConfig {
    pub fn credential_source(&self) -> CredentialSource {
        CredentialSource::Env(self.api_key_env.clone())
    }
}

/// Startup values for [`AgentConfig`]. Unset fields use the built-in defaults.
#[derive(Debug, Deserialize, Clone)]
pub struct AgentDefaults {
    #[serde(default = "default_agent_name")]
    pub name: String,
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            system_instruction: default_system_instruction(),
            model: default_model(),
            temperature: default_temperature(),
        }
    }
}

fn default_agent_name() -> String {
    DEFAULT_AGENT_NAME.to_string()
}
fn default_system_instruction() -> String {
    DEFAULT_SYSTEM_INSTRUCTION.to_string()
}
fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

impl AgentDefaults {
    pub fn to_agent_config(&self) -> AgentConfig {
        AgentConfig {
            name: self.name.clone(),
            system_instruction: self.system_instruction.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
        }
    }
}

impl Config {
    /// Built-in defaults, used when no config file exists.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig::default(),
            server: ServerConfig::default(),
            provider: ProviderConfig::default(),
            agent: AgentDefaults::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

/// Load the config file if present, otherwise fall back to [`Config::minimal`].
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

fn validate(config: &Config) -> Result<()> {
    if !(0.0..=1.0).contains(&config.agent.temperature) {
        anyhow::bail!("agent.temperature must be in [0.0, 1.0]");
    }

    if config.provider.api_key_env.trim().is_empty() {
        anyhow::bail!("provider.api_key_env must not be empty");
    }

    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn empty_file_uses_defaults() {
        let file = write_config("");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:3000");
        assert_eq!(config.provider.api_key_env, "GEMINI_API_KEY");
        assert_eq!(config.agent.to_agent_config(), AgentConfig::default());
    }

    #[test]
    fn agent_overrides_are_applied() {
        let file = write_config(
            r#"
[agent]
name = "Iris"
temperature = 0.2
"#,
        );
        let agent = load_config(file.path()).unwrap().agent.to_agent_config();
        assert_eq!(agent.name, "Iris");
        assert_eq!(agent.temperature, 0.2);
        assert_eq!(agent.model, DEFAULT_MODEL);
    }

    #[test]
    fn out_of_range_temperature_is_rejected() {
        let file = write_config("[agent]\ntemperature = 1.5\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("agent.temperature"));
    }

    #[test]
    fn missing_file_falls_back_to_minimal() {
        let config = load_or_default(Path::new("/nonexistent/nexus.toml")).unwrap();
        assert_eq!(config.db.path, PathBuf::from("./data/nexus.sqlite"));
    }

    #[test]
    fn example_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/nexus.example.toml");
        let config = load_config(&path).unwrap();
        assert_eq!(config.agent.to_agent_config(), AgentConfig::default());
        assert!(config.server.static_dir.is_none());
    }
}
