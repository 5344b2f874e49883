//! Configuration schema types for banter.
//!
//! All structs use `serde(default)` so partial configs work correctly.
//! Missing fields are filled with sensible defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

// =============================================================================
// Model Config
// =============================================================================

/// Model service selection and generation parameters. The API key is read
/// from the `GEMINI_API_KEY` environment variable, never from this file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    pub api_base: String,
    /// Sampling temperature (valid range: 0.0-2.0).
    pub temperature: f64,
    /// Maximum tokens per response (valid range: 1-65536).
    pub max_output_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "gemini-2.0-flash".into(),
            api_base: "https://generativelanguage.googleapis.com".into(),
            temperature: 0.7,
            max_output_tokens: 2048,
        }
    }
}

// =============================================================================
// Chat Config
// =============================================================================

/// Conversation behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Optional system instruction sent with every session.
    pub system_instruction: Option<String>,
    /// Whether registered tools are advertised to the model.
    pub tools_enabled: bool,
    /// Minimum interval between streamed-text flushes in milliseconds
    /// (valid range: 0-10000).
    pub flush_interval_ms: u64,
    /// Maximum tool-call rounds per turn (valid range: 1-16).
    pub max_tool_rounds: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_instruction: None,
            tools_enabled: true,
            flush_interval_ms: 120,
            max_tool_rounds: 4,
        }
    }
}

// =============================================================================
// Upload Config
// =============================================================================

/// Attachment upload ceilings and readiness polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Largest file accepted for upload, in bytes.
    pub max_file_bytes: u64,
    /// Fixed delay between readiness polls in milliseconds
    /// (valid range: 100-60000).
    pub poll_interval_ms: u64,
    /// Polls before giving up (valid range: 1-600).
    pub poll_max_attempts: u32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: 20 * 1024 * 1024,
            poll_interval_ms: 2_000,
            poll_max_attempts: 30,
        }
    }
}

// =============================================================================
// Store Config
// =============================================================================

/// Chat-history persistence service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub enabled: bool,
    pub base_url: String,
    /// Persona bound to newly created chat records.
    pub persona_id: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://localhost:8080/api".into(),
            persona_id: None,
        }
    }
}

// =============================================================================
// Recording Config
// =============================================================================

/// Voice-note capture. The command is spawned with `{output}` in the
/// argument list replaced by the destination wav path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Directory for finished clips; the system temp dir when unset.
    pub output_dir: Option<PathBuf>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            command: "sox".into(),
            args: vec!["-d".into(), "-c".into(), "1".into(), "{output}".into()],
            output_dir: None,
        }
    }
}

// =============================================================================
// Logging Config
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter directive, overridable with `RUST_LOG`.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "banter=info".into(),
        }
    }
}

// =============================================================================
// Root Config
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BanterConfig {
    pub model: ModelConfig,
    pub chat: ChatConfig,
    pub upload: UploadConfig,
    pub store: StoreConfig,
    pub recording: RecordingConfig,
    pub logging: LoggingConfig,
}
