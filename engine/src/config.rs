use model::LlmConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_concurrent() -> usize {
    3
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl ProcessorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Engine configuration, loadable from a TOML file with environment
/// overrides for the LLM endpoint:
///
/// ```toml
/// [llm]
/// base_url = "http://localhost:11434"
/// model = "llama3.1:8b"
///
/// [processor]
/// poll_interval_ms = 1000
/// max_concurrent = 3
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub processor: ProcessorSettings,
}

impl EngineConfig {
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let mut config: EngineConfig = toml::from_str(&text)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a config
    /// file.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(base_url) = std::env::var("PARLEY_LLM_BASE_URL") {
            self.llm.base_url = base_url;
        }
        if let Ok(api_key) = std::env::var("PARLEY_LLM_API_KEY") {
            self.llm.api_key = Some(api_key);
        }
        if let Ok(llm_model) = std::env::var("PARLEY_LLM_MODEL") {
            self.llm.model = llm_model;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.llm
            .validate()
            .map_err(|message| ConfigError::Invalid { message })?;

        if self.processor.max_concurrent == 0 {
            return Err(ConfigError::Invalid {
                message: "processor.max_concurrent must be at least 1".to_string(),
            });
        }
        if self.processor.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                message: "processor.poll_interval_ms must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.processor.max_concurrent, 3);
        assert_eq!(config.processor.poll_interval(), Duration::from_millis(1000));
    }

    #[test]
    fn test_parse_toml() {
        let toml_text = r#"
            [llm]
            base_url = "http://llm.internal:8000"
            model = "qwen3:0.6b"
            timeout = 30

            [processor]
            poll_interval_ms = 250
            max_concurrent = 8
        "#;

        let config: EngineConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(config.llm.base_url, "http://llm.internal:8000");
        assert_eq!(config.llm.model, "qwen3:0.6b");
        assert_eq!(config.llm.timeout, Duration::from_secs(30));
        assert_eq!(config.processor.poll_interval_ms, 250);
        assert_eq!(config.processor.max_concurrent, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str("[llm]\nmodel = \"llama3.1:8b\"\n").unwrap();
        assert_eq!(config.processor.max_concurrent, 3);
        assert_eq!(config.llm.base_url, LlmConfig::default().base_url);
    }

    #[test]
    fn test_validation_rejects_zero_bounds() {
        let mut config = EngineConfig::default();
        config.processor.max_concurrent = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.processor.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }
}
