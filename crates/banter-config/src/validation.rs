//! Configuration validation.
//!
//! Checks numeric ranges and cross-field requirements, collecting all
//! errors into one message.

use crate::schema::BanterConfig;
use banter_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &BanterConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    // Model constraints
    validate_range_f64(
        &mut errors,
        "model.temperature",
        config.model.temperature,
        0.0,
        2.0,
    );
    validate_range(
        &mut errors,
        "model.max_output_tokens",
        config.model.max_output_tokens,
        1,
        65_536,
    );
    if config.model.name.trim().is_empty() {
        errors.push("model.name must not be empty".into());
    }
    if config.model.api_base.trim().is_empty() {
        errors.push("model.api_base must not be empty".into());
    }

    // Chat constraints
    validate_range_u64(
        &mut errors,
        "chat.flush_interval_ms",
        config.chat.flush_interval_ms,
        0,
        10_000,
    );
    validate_range(
        &mut errors,
        "chat.max_tool_rounds",
        config.chat.max_tool_rounds,
        1,
        16,
    );

    // Upload constraints
    if config.upload.max_file_bytes == 0 {
        errors.push("upload.max_file_bytes must be positive".into());
    }
    validate_range_u64(
        &mut errors,
        "upload.poll_interval_ms",
        config.upload.poll_interval_ms,
        100,
        60_000,
    );
    validate_range(
        &mut errors,
        "upload.poll_max_attempts",
        config.upload.poll_max_attempts,
        1,
        600,
    );

    // Store constraints
    if config.store.enabled && config.store.base_url.trim().is_empty() {
        errors.push("store.base_url must be set when store.enabled = true".into());
    }

    // Recording constraints
    if config.recording.command.trim().is_empty() {
        errors.push("recording.command must not be empty".into());
    }
    if !config.recording.args.iter().any(|a| a == "{output}") {
        errors.push("recording.args must contain the {output} placeholder".into());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}

fn validate_range(errors: &mut Vec<String>, name: &str, value: u32, min: u32, max: u32) {
    if value < min || value > max {
        errors.push(format!("{name} = {value} is out of range [{min}, {max}]"));
    }
}

fn validate_range_u64(errors: &mut Vec<String>, name: &str, value: u64, min: u64, max: u64) {
    if value < min || value > max {
        errors.push(format!("{name} = {value} is out of range [{min}, {max}]"));
    }
}

fn validate_range_f64(errors: &mut Vec<String>, name: &str, value: f64, min: f64, max: f64) {
    if value < min || value > max {
        errors.push(format!("{name} = {value} is out of range [{min}, {max}]"));
    }
}
