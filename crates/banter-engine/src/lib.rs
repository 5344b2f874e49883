//! Conversation engine for Banter.
//!
//! Everything between "the user pressed enter" and "the model finished
//! answering" lives here:
//!
//! - **Streaming**: SSE chunk parsing into tagged [`StreamChunk`]s
//! - **Sessions**: lifecycle and hydration via [`session::SessionManager`]
//! - **Tools**: registration and batched dispatch via [`tools::ToolRegistry`]
//! - **Attachments**: upload and bounded readiness polling via
//!   [`upload::AttachmentUploader`]
//! - **Orchestration**: the busy-guarded, cancellable stream consumer in
//!   [`orchestrator::ChatOrchestrator`]
//!
//! The Gemini API backend under [`gemini`] is the only concrete
//! [`ModelBackend`]; everything above it is written against the traits so
//! tests can script a fake service.

pub mod gemini;
pub mod orchestrator;
pub mod session;
pub mod sse;
pub mod tools;
pub mod upload;

use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use serde::{Deserialize, Serialize};

pub use gemini::{GeminiClient, GeminiConfig};
pub use orchestrator::{CancelHandle, ChatOrchestrator, OutgoingMessage, SendOutcome, FAILURE_NOTICE};
pub use session::{DisplayMessage, SessionManager};
pub use tools::{ToolError, ToolHandler, ToolRegistry, ToolSpec};
pub use upload::{Attachment, AttachmentState, AttachmentUploader, PollOutcome, PollPolicy};

/// Speaker role in the model service's vocabulary.
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

/// One piece of a turn's content.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    /// Reference to a file previously uploaded to the model service.
    File { uri: String, mime_type: String },
    FunctionCall(ToolCall),
    FunctionResponse(ToolResult),
}

impl Part {
    pub fn text(content: impl Into<String>) -> Self {
        Part::Text(content.into())
    }
}

/// One committed entry of a conversation.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            role,
            parts,
            created_at: Utc::now(),
        }
    }

    pub fn user(parts: Vec<Part>) -> Self {
        Self::new(Role::User, parts)
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Self::new(Role::Model, parts)
    }

    /// Concatenated text content, skipping non-text parts.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let Part::Text(text) = part {
                out.push_str(text);
            }
        }
        out
    }
}

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id, generated locally when the service omits one.
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

/// The answer to one [`ToolCall`], correlated by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    pub payload: serde_json::Value,
}

impl ToolResult {
    pub fn ok(call: &ToolCall, payload: serde_json::Value) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            payload,
        }
    }

    /// Failure result carrying the error shape the model is told about.
    pub fn error(call: &ToolCall, message: impl Into<String>) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            payload: serde_json::json!({
                "error": true,
                "message": message.into(),
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.payload["error"].as_bool().unwrap_or(false)
    }
}

/// One parsed unit of a streamed model response.
///
/// A response chunk that carries any function call is a `ToolCalls`
/// chunk; text sharing the same chunk is not surfaced.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

/// Stream of parsed chunks for one exchange.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, EngineError>> + Send>>;

/// One live exchange context against the model service.
///
/// Sessions are passive: `send_stream` and `send_followup` read the
/// history when building requests but never extend it. The consumer
/// decides which turns become part of the record via `push_turn`, so
/// abandoned exchanges leave no trace.
#[async_trait]
pub trait ModelSession: Send {
    /// Open a streamed exchange with `parts` as the new user turn.
    async fn send_stream(&self, parts: &[Part]) -> Result<ChunkStream, EngineError>;

    /// Continue the previous exchange with tool results.
    async fn send_followup(&self, results: &[ToolResult]) -> Result<ChunkStream, EngineError>;

    fn history(&self) -> &[Turn];

    fn push_turn(&mut self, turn: Turn);
}

/// Factory for [`ModelSession`]s.
pub trait ModelBackend: Send + Sync {
    fn create_session(
        &self,
        history: Vec<Turn>,
        system_instruction: Option<String>,
        tools: Vec<ToolSpec>,
    ) -> Box<dyn ModelSession>;
}

/// Processing state of a file held by the model service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFileState {
    Processing,
    Active,
    Failed,
}

/// A file resource on the model service's file storage.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFile {
    /// Bare resource id, without the `files/` prefix.
    pub id: String,
    pub uri: String,
    pub state: RemoteFileState,
}

/// File storage offered by the model service.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn upload(
        &self,
        path: &Path,
        mime_type: &str,
        display_name: &str,
    ) -> Result<RemoteFile, EngineError>;

    async fn get_state(&self, id: &str) -> Result<RemoteFile, EngineError>;
}

/// Errors produced by the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Rate limited by the API")]
    RateLimited,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("File error: {0}")]
    File(String),

    #[error("Session is busy with another request")]
    SessionBusy,

    #[error("Cannot send an empty message")]
    EmptyMessage,

    #[error("File is {size} bytes, over the {limit} byte limit")]
    SizeExceeded { size: u64, limit: u64 },

    #[error("Remote processing failed: {0}")]
    ProcessingFailed(String),

    #[error("File not active after {attempts} readiness polls")]
    ReadinessTimeout { attempts: u32 },

    #[error("Attachment is not ready to send: {0}")]
    AttachmentNotReady(String),
}
