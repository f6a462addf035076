use companion_core::{CompanionError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

pub mod env_substitution;

pub use env_substitution::substitute_env_vars;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanionConfig {
    #[serde(default)]
    pub persona: PersonaSettings,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub memory: MemorySettings,
    #[serde(default)]
    pub paths: PathSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaSettings {
    #[serde(default = "default_persona_name")]
    pub name: String,
}

/// Remote text-generation endpoint and its fixed sampling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySettings {
    /// Transcript messages handed to the engine with each send
    #[serde(default = "default_context_limit")]
    pub context_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    #[serde(default = "default_home_dir")]
    pub home_dir: PathBuf,
}

impl CompanionConfig {
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CompanionError::ConfigError(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut config = Self::parse_yaml(yaml)?;

        config.expand_env_vars();
        config.validate()?;

        Ok(config)
    }

    /// Parse and substitute `${VAR}` references, before environment overrides apply
    fn parse_yaml(yaml: &str) -> Result<Self> {
        let mut value: serde_json::Value = if yaml.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_yaml::from_str(yaml)
                .map_err(|e| CompanionError::ConfigError(format!("Failed to parse YAML: {}", e)))?
        };

        if value.is_null() {
            value = serde_json::Value::Object(Default::default());
        }

        substitute_env_vars(&mut value)?;

        serde_json::from_value(value)
            .map_err(|e| CompanionError::ConfigError(format!("Invalid configuration: {}", e)))
    }

    /// Load the file if it exists, otherwise fall back to defaults plus environment overrides
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            debug!("Loading configuration from {:?}", path);
            Self::from_yaml(path)
        } else {
            debug!("No configuration at {:?}, using defaults", path);
            let mut config = Self::default();
            config.expand_env_vars();
            config.validate()?;
            Ok(config)
        }
    }

    fn expand_env_vars(&mut self) {
        if let Ok(home_dir) = env::var("HOME_DIR") {
            self.paths.home_dir = PathBuf::from(home_dir);
        }
        if let Ok(api_key) = env::var("GEMINI_API_KEY") {
            if !api_key.is_empty() {
                self.model.api_key = api_key;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.persona.name.trim().is_empty() {
            return Err(CompanionError::ConfigError("Persona name cannot be empty".into()));
        }
        if self.model.endpoint.is_empty() {
            return Err(CompanionError::ConfigError("Model endpoint cannot be empty".into()));
        }
        if self.model.model.is_empty() {
            return Err(CompanionError::ConfigError("Model cannot be empty".into()));
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(CompanionError::ConfigError("Temperature must be between 0.0 and 2.0".into()));
        }
        if !(0.0..=1.0).contains(&self.model.top_p) {
            return Err(CompanionError::ConfigError("top_p must be between 0.0 and 1.0".into()));
        }
        if self.model.max_output_tokens == 0 {
            return Err(CompanionError::ConfigError("max_output_tokens must be positive".into()));
        }
        Ok(())
    }

    /// True when no API key is configured and every reply comes from the fallback responder
    pub fn is_offline(&self) -> bool {
        self.model.api_key.trim().is_empty()
    }

    /// Directory holding the persisted profile and history records
    pub fn memory_dir(&self) -> PathBuf {
        self.paths.home_dir.join(".companion").join("memory")
    }

    pub fn default_config_path() -> PathBuf {
        default_home_dir().join(".companion").join("companion.yaml")
    }
}

impl Default for PersonaSettings {
    fn default() -> Self {
        Self {
            name: default_persona_name(),
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: String::new(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            top_p: default_top_p(),
            top_k: default_top_k(),
        }
    }
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            context_limit: default_context_limit(),
        }
    }
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            home_dir: default_home_dir(),
        }
    }
}

fn default_persona_name() -> String { "Alex".to_string() }
fn default_endpoint() -> String { "https://generativelanguage.googleapis.com/v1beta".to_string() }
fn default_model() -> String { "gemini-1.5-flash".to_string() }
fn default_temperature() -> f32 { 0.9 }
fn default_max_output_tokens() -> u32 { 1000 }
fn default_top_p() -> f32 { 0.8 }
fn default_top_k() -> u32 { 40 }
fn default_context_limit() -> usize { 10 }

fn default_home_dir() -> PathBuf {
    env::var("HOME_DIR")
        .map(PathBuf::from)
        .ok()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}
