//! Session lifecycle: creation, hydration, reset.

use std::sync::Arc;

use banter_common::{EntityRole, StoredMessage};
use serde::Serialize;
use tracing::debug;

use crate::tools::ToolSpec;
use crate::{ChunkStream, EngineError, ModelBackend, ModelSession, Part, Role, ToolResult, Turn};

/// One rendered row of the conversation view.
#[derive(Debug, Clone, Serialize)]
pub struct DisplayMessage {
    pub role: EntityRole,
    pub content: String,
    pub file_url: Option<String>,
}

impl DisplayMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: EntityRole::User,
            content: content.into(),
            file_url: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: EntityRole::Assistant,
            content: content.into(),
            file_url: None,
        }
    }
}

/// Owns the live model session and the canonical history it is built
/// from.
///
/// Changing the system instruction or tool advertisement never mutates
/// the live session; it is dropped (its history folded back into the
/// canonical copy) and the next send builds a fresh one. The orchestrator
/// holds this manager behind an async lock for the whole of a send, so a
/// live session is never replaced mid-exchange.
pub struct SessionManager {
    backend: Arc<dyn ModelBackend>,
    system_instruction: Option<String>,
    tools_enabled: bool,
    tools: Vec<ToolSpec>,
    history: Vec<Turn>,
    live: Option<Box<dyn ModelSession>>,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self {
            backend,
            system_instruction: None,
            tools_enabled: true,
            tools: Vec::new(),
            history: Vec::new(),
            live: None,
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_tools_enabled(mut self, enabled: bool) -> Self {
        self.tools_enabled = enabled;
        self
    }

    /// Replace the system instruction. Takes effect on the next send.
    pub fn set_system_instruction(&mut self, instruction: Option<String>) {
        self.system_instruction = instruction;
        self.invalidate();
    }

    /// Toggle tool advertisement. Takes effect on the next send.
    pub fn set_tools_enabled(&mut self, enabled: bool) {
        self.tools_enabled = enabled;
        self.invalidate();
    }

    /// Replace the advertised tool declarations. Takes effect on the
    /// next send.
    pub fn set_tools(&mut self, tools: Vec<ToolSpec>) {
        self.tools = tools;
        self.invalidate();
    }

    /// Forget the conversation entirely.
    pub fn reset(&mut self) {
        self.live = None;
        self.history.clear();
    }

    /// Install a persisted conversation, replacing any current state.
    /// Returns the display view of what was installed.
    pub fn hydrate(&mut self, stored: &[StoredMessage]) -> Vec<DisplayMessage> {
        let (display, history) = convert_stored(stored);
        debug!(messages = stored.len(), "hydrating session from stored history");
        self.live = None;
        self.history = history;
        display
    }

    pub fn history(&self) -> &[Turn] {
        match &self.live {
            Some(live) => live.history(),
            None => &self.history,
        }
    }

    pub fn turn_count(&self) -> usize {
        self.history().len()
    }

    /// Open a streamed exchange, creating the live session on demand.
    pub async fn send_stream(&mut self, parts: &[Part]) -> Result<ChunkStream, EngineError> {
        self.ensure_live().send_stream(parts).await
    }

    /// Continue the live session's exchange with tool results.
    pub async fn send_followup(
        &mut self,
        results: &[ToolResult],
    ) -> Result<ChunkStream, EngineError> {
        self.ensure_live().send_followup(results).await
    }

    /// Record an accepted turn on the live session.
    pub fn push_turn(&mut self, turn: Turn) {
        self.ensure_live().push_turn(turn);
    }

    /// Drop the live session, folding its history into the canonical
    /// copy so nothing committed is lost.
    fn invalidate(&mut self) {
        if let Some(live) = self.live.take() {
            self.history = live.history().to_vec();
        }
    }

    fn ensure_live(&mut self) -> &mut Box<dyn ModelSession> {
        if self.live.is_none() {
            let tools = if self.tools_enabled {
                self.tools.clone()
            } else {
                Vec::new()
            };
            debug!(
                turns = self.history.len(),
                tools = tools.len(),
                "creating model session"
            );
            self.live = Some(self.backend.create_session(
                self.history.clone(),
                self.system_instruction.clone(),
                tools,
            ));
        }
        self.live.as_mut().unwrap()
    }
}

/// Convert persisted messages into the display view and model history.
///
/// Every stored message maps to exactly one display row and one model
/// turn, in order; assistant rows are relabeled to the model role.
/// Attachment URLs are service-private, so hydrated turns carry text
/// only.
pub fn convert_stored(stored: &[StoredMessage]) -> (Vec<DisplayMessage>, Vec<Turn>) {
    let mut display = Vec::with_capacity(stored.len());
    let mut history = Vec::with_capacity(stored.len());

    for message in stored {
        display.push(DisplayMessage {
            role: message.entity,
            content: message.text.clone(),
            file_url: message.file_url.clone(),
        });

        let role = match message.entity {
            EntityRole::User => Role::User,
            EntityRole::Assistant => Role::Model,
        };
        history.push(Turn::new(role, vec![Part::Text(message.text.clone())]));
    }

    (display, history)
}
