//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::AppConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Prefix of environment variables overriding file values.
pub const ENV_PREFIX: &str = "TIMBURR_";

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content, |key| std::env::var(key).ok())
}

/// Parse, apply environment overrides, then validate.
pub fn parse_config<F>(content: &str, env: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: AppConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    apply_env_overrides(&mut config, env);

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

fn apply_env_overrides<F>(config: &mut AppConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(brokers) = env(&format!("{ENV_PREFIX}BROKER_BROKERS")) {
        config.broker.brokers = brokers;
    }
    if let Some(endpoint) = env(&format!("{ENV_PREFIX}JOB_RUNNER_ENDPOINT")) {
        config.job_runner.endpoint = endpoint;
    }
}
