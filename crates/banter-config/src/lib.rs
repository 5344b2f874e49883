//! Banter configuration system.
//!
//! TOML-based, validated on load, and fully defaulted: every section
//! works when its table is missing, so a config file only needs the
//! overrides.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use banter_config::load_config;
//!
//! let config = load_config().expect("failed to load config");
//! println!("model: {}", config.model.name);
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

// Re-export core types for convenience
pub use schema::{
    BanterConfig, ChatConfig, LoggingConfig, ModelConfig, RecordingConfig, StoreConfig,
    UploadConfig, CONFIG_SCHEMA_VERSION,
};
pub use toml_loader::{default_config_path, load_from_path};

use banter_common::ConfigError;

/// Load the config from its platform default path, writing a commented
/// default file on first run.
pub fn load_config() -> Result<BanterConfig, ConfigError> {
    let config = toml_loader::load_default()?;
    validation::validate(&config)?;
    Ok(config)
}
