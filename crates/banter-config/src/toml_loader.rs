//! TOML config file loading and creation.

use crate::schema::BanterConfig;
use crate::validation;
use banter_common::ConfigError;
use std::path::Path;
use tracing::{info, warn};

/// Load and validate a config from one TOML file.
///
/// Missing fields take their serde defaults, so a partial file is fine.
/// A file that parses but fails validation is rejected as a whole: a
/// warning is logged and the default config is returned instead.
pub fn load_from_path(path: &Path) -> Result<BanterConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::ParseError(format!("unreadable config {}: {e}", path.display()))
    })?;

    let config: BanterConfig = toml::from_str(&content)
        .map_err(|e| ConfigError::ParseError(format!("invalid TOML: {e}")))?;

    if let Err(e) = validation::validate(&config) {
        warn!("config rejected, running on defaults: {e}");
        return Ok(BanterConfig::default());
    }

    info!("loaded config from {}", path.display());
    Ok(config)
}

/// Load config from the OS config directory, writing a commented
/// default file on first run.
pub fn load_default() -> Result<BanterConfig, ConfigError> {
    let path = default_config_path()?;

    if path.exists() {
        load_from_path(&path)
    } else {
        info!("no config at {}, writing the default", path.display());
        create_default_config(&path)?;
        Ok(BanterConfig::default())
    }
}

/// Platform config file location, `<config dir>/banter/config.toml`.
pub fn default_config_path() -> Result<std::path::PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join("banter").join("config.toml"))
        .ok_or_else(|| ConfigError::ParseError("no config directory on this platform".into()))
}

/// Write the commented default config file, creating parent directories.
pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            ConfigError::ParseError(format!("cannot create {}: {e}", parent.display()))
        })?;
    }

    std::fs::write(path, default_config_toml()).map_err(|e| {
        ConfigError::ParseError(format!("cannot write {}: {e}", path.display()))
    })?;

    info!("created default config at {}", path.display());
    Ok(())
}

/// Generate the default TOML config content with comments.
fn default_config_toml() -> String {
    r##"# Banter Configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.
# The model API key comes from the GEMINI_API_KEY environment variable.

[model]
# name = "gemini-2.0-flash"
# api_base = "https://generativelanguage.googleapis.com"
# temperature = 0.7          # 0.0-2.0
# max_output_tokens = 2048   # 1-65536

[chat]
# system_instruction = "You are a friendly conversation partner."
# tools_enabled = true
# flush_interval_ms = 120    # 0-10000
# max_tool_rounds = 4        # 1-16

[upload]
# max_file_bytes = 20971520  # 20 MiB
# poll_interval_ms = 2000    # 100-60000
# poll_max_attempts = 30     # 1-600

[store]
# enabled = false
# base_url = "http://localhost:8080/api"
# persona_id = ""

[recording]
# command = "sox"
# args = ["-d", "-c", "1", "{output}"]
# output_dir = ""            # system temp dir when unset

[logging]
# filter = "banter=info"
"##
    .to_string()
}
