//! Configuration management for Faxbot
//!
//! Settings merge from four layers, lowest priority first:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file (`config/faxbot.toml` or `FAXBOT_CONFIG`)
//! 3. `FAXBOT__<section>__<key>` environment overrides
//! 4. Flat operator environment variables (`FAX_BACKEND`, `API_KEY`,
//!    `MAX_FILE_SIZE_MB`, ...) — these names are a deployment contract
//!
//! Secrets (API keys, provider credentials, the AMI password) are only
//! ever read from the environment, never from TOML.

mod models;
mod sources;
mod validation;

pub use models::{
    AmiConfig, AuditConfig, AuthConfig, BackendConfig, BackendKind, Config, ConvertConfig,
    InboundConfig, LimitsConfig, PhaxioConfig, ProcessorKind, RetentionConfig, ServerConfig,
    SinchConfig, StorageConfig, StorageProvider, TokenConfig,
};
pub use sources::apply_operator_env;
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
