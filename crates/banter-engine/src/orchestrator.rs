//! The stream consumer: drives one turn end to end.
//!
//! A send is optimistic (user row and assistant placeholder land in the
//! transcript before the first byte arrives), throttled (text snapshots
//! are flushed to subscribers at a fixed minimum interval), cancellable
//! at chunk boundaries, and guarded so only one send runs at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use banter_common::{
    ChatId, EntityRole, EventBus, HistoryStore, NewMessage, SessionEvent, StoredMessage,
};

use crate::session::{DisplayMessage, SessionManager};
use crate::tools::ToolRegistry;
use crate::upload::Attachment;
use crate::{EngineError, Part, StreamChunk, ToolCall, Turn};

/// Text shown in place of a model turn that failed before finalizing.
pub const FAILURE_NOTICE: &str =
    "Something went wrong while answering. Please try sending that again.";

/// One outgoing user message: text plus an optional ready attachment.
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub text: String,
    pub attachment: Option<Attachment>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    /// Compose the wire parts, attachment first. Rejects messages with
    /// nothing to send and attachments that are not active yet.
    fn to_parts(&self) -> Result<Vec<Part>, EngineError> {
        let mut parts = Vec::new();
        if let Some(attachment) = &self.attachment {
            parts.push(attachment.to_part()?);
        }
        if !self.text.is_empty() {
            parts.push(Part::Text(self.text.clone()));
        }
        if parts.is_empty() {
            return Err(EngineError::EmptyMessage);
        }
        Ok(parts)
    }
}

/// How a send ended.
#[derive(Debug)]
pub enum SendOutcome {
    /// The turn finalized; the model turn is committed to the session.
    Completed(Turn),
    /// The caller cancelled mid-stream. The transcript keeps whatever
    /// was flushed before the cancel; nothing was committed or persisted.
    Cancelled,
    /// The stream failed before finalizing. The transcript shows the
    /// failure notice; nothing was committed or persisted.
    Failed(EngineError),
}

/// Cloneable handle for cancelling an in-flight send from another task.
#[derive(Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Clears the busy flag when the send future completes or is dropped.
struct BusyGuard {
    flag: Arc<AtomicBool>,
}

impl BusyGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self, EngineError> {
        if flag
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(EngineError::SessionBusy);
        }
        Ok(Self { flag: flag.clone() })
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Throttle for streamed-text flushes. The first flush goes out
/// immediately; later ones wait out the interval. A zero interval
/// flushes every chunk.
struct FlushGate {
    interval: Duration,
    last: Option<Instant>,
}

impl FlushGate {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

struct StoreBinding {
    store: Arc<dyn HistoryStore>,
    chat: ChatId,
}

/// Drives turns against the model service.
///
/// Methods take `&self`; the orchestrator is meant to live in an `Arc`
/// shared between the REPL loop and whatever owns the cancel handle. The
/// session manager sits behind an async lock held for the whole of a
/// send, so setters and hydration wait for the in-flight turn.
pub struct ChatOrchestrator {
    manager: Mutex<SessionManager>,
    registry: ToolRegistry,
    events: EventBus,
    transcript: std::sync::Mutex<Vec<DisplayMessage>>,
    binding: Option<StoreBinding>,
    busy: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    flush_interval: Duration,
    max_tool_rounds: u32,
}

impl ChatOrchestrator {
    pub fn new(mut manager: SessionManager, registry: ToolRegistry) -> Self {
        manager.set_tools(registry.declarations());
        Self {
            manager: Mutex::new(manager),
            registry,
            events: EventBus::default(),
            transcript: std::sync::Mutex::new(Vec::new()),
            binding: None,
            busy: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
            flush_interval: Duration::from_millis(120),
            max_tool_rounds: 4,
        }
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    /// Persist finalized turns to `store` under `chat`.
    pub fn with_store(mut self, store: Arc<dyn HistoryStore>, chat: ChatId) -> Self {
        self.binding = Some(StoreBinding { store, chat });
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Handle for cancelling the in-flight send. Cancelling while idle
    /// is a no-op; the flag is rearmed at the start of every send.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: self.cancel.clone(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Snapshot of the conversation view.
    pub fn transcript(&self) -> Vec<DisplayMessage> {
        self.with_transcript(|t| t.clone())
    }

    /// Drop the conversation. Waits for any in-flight send to finish.
    pub async fn reset(&self) {
        let mut manager = self.manager.lock().await;
        manager.reset();
        self.with_transcript(|t| t.clear());
    }

    /// Install a persisted conversation, replacing the current one.
    pub async fn restore(&self, stored: &[StoredMessage]) {
        let mut manager = self.manager.lock().await;
        let display = manager.hydrate(stored);
        self.with_transcript(|t| *t = display);
    }

    /// Replace the system instruction. Waits for any in-flight send;
    /// takes effect on the next one.
    pub async fn set_system_instruction(&self, instruction: Option<String>) {
        self.manager.lock().await.set_system_instruction(instruction);
    }

    /// Toggle tool advertisement for future sends.
    pub async fn set_tools_enabled(&self, enabled: bool) {
        self.manager.lock().await.set_tools_enabled(enabled);
    }

    /// Send one user message and drive the exchange to completion.
    ///
    /// Returns an error only for preconditions (another send in flight,
    /// empty message, attachment not ready). Once streaming starts,
    /// failures are folded into the returned [`SendOutcome`] so the
    /// orchestrator is always ready for the next send.
    pub async fn send(&self, message: OutgoingMessage) -> Result<SendOutcome, EngineError> {
        let _guard = BusyGuard::acquire(&self.busy)?;
        let parts = message.to_parts()?;
        self.cancel.store(false, Ordering::Release);

        let mut manager = self.manager.lock().await;

        self.with_transcript(|t| {
            t.push(DisplayMessage {
                role: EntityRole::User,
                content: message.text.clone(),
                file_url: message
                    .attachment
                    .as_ref()
                    .and_then(|a| a.stored_url.clone()),
            });
            t.push(DisplayMessage::assistant(""));
        });
        self.events.publish(SessionEvent::TurnStarted);

        let mut stream = match manager.send_stream(&parts).await {
            Ok(stream) => stream,
            Err(e) => return Ok(self.fail_turn(e)),
        };
        manager.push_turn(Turn::user(parts));

        let mut gate = FlushGate::new(self.flush_interval);
        let mut buffer = String::new();
        let mut flushed = String::new();
        let mut rounds = 0u32;

        loop {
            let mut calls: Vec<ToolCall> = Vec::new();

            while let Some(item) = stream.next().await {
                if self.cancel.load(Ordering::Acquire) {
                    debug!("send cancelled at chunk boundary");
                    self.events.publish(SessionEvent::TurnCancelled);
                    return Ok(SendOutcome::Cancelled);
                }

                match item {
                    Ok(StreamChunk::Text(text)) => {
                        buffer.push_str(&text);
                        if gate.ready() {
                            self.flush(&mut flushed, &buffer);
                        }
                    }
                    Ok(StreamChunk::ToolCalls(batch)) => {
                        calls.extend(batch);
                    }
                    Err(e) => return Ok(self.fail_turn(e)),
                }
            }

            if self.cancel.load(Ordering::Acquire) {
                self.events.publish(SessionEvent::TurnCancelled);
                return Ok(SendOutcome::Cancelled);
            }

            if calls.is_empty() {
                break;
            }

            rounds += 1;
            if rounds > self.max_tool_rounds {
                warn!(rounds, "tool round limit reached, finalizing with buffered text");
                break;
            }

            debug!(calls = calls.len(), round = rounds, "dispatching tool batch");
            manager.push_turn(Turn::model(
                calls.iter().cloned().map(Part::FunctionCall).collect(),
            ));

            let results = self.registry.dispatch(&calls).await;

            stream = match manager.send_followup(&results).await {
                Ok(stream) => stream,
                Err(e) => return Ok(self.fail_turn(e)),
            };
            manager.push_turn(Turn::user(
                results.into_iter().map(Part::FunctionResponse).collect(),
            ));

            // the follow-up answer replaces anything buffered this round
            buffer.clear();
        }

        if buffer != flushed {
            self.flush(&mut flushed, &buffer);
        }

        let model_turn = Turn::model(vec![Part::Text(buffer.clone())]);
        manager.push_turn(model_turn.clone());
        self.set_model_row(&buffer);
        self.events.publish(SessionEvent::TurnCompleted {
            content: buffer.clone(),
        });

        self.persist_turn(&message, buffer);

        Ok(SendOutcome::Completed(model_turn))
    }

    /// Publish a snapshot of the accumulated text and mirror it into the
    /// placeholder row.
    fn flush(&self, flushed: &mut String, buffer: &str) {
        *flushed = buffer.to_string();
        self.set_model_row(buffer);
        self.events.publish(SessionEvent::TextFlush {
            content: buffer.to_string(),
        });
    }

    fn set_model_row(&self, content: &str) {
        self.with_transcript(|t| {
            if let Some(last) = t.last_mut() {
                last.content = content.to_string();
            }
        });
    }

    fn fail_turn(&self, error: EngineError) -> SendOutcome {
        warn!(error = %error, "turn failed before finalizing");
        self.set_model_row(FAILURE_NOTICE);
        self.events.publish(SessionEvent::TurnFailed {
            message: error.to_string(),
        });
        SendOutcome::Failed(error)
    }

    /// Hand the finalized pair to the history service in the background.
    /// Persistence failures are logged, never surfaced to the turn.
    fn persist_turn(&self, message: &OutgoingMessage, model_text: String) {
        let Some(binding) = &self.binding else {
            return;
        };

        let mut user = NewMessage::text(EntityRole::User, message.text.clone());
        if let Some(attachment) = &message.attachment {
            if let Some(url) = &attachment.stored_url {
                user = user.with_file(url.clone(), attachment.mime_type.clone());
            }
        }
        let model = NewMessage::text(EntityRole::Assistant, model_text);

        let store = binding.store.clone();
        let chat = binding.chat.clone();
        tokio::spawn(async move {
            if let Err(e) = store.append_message(&chat, &user).await {
                warn!(error = %e, "failed to persist user message");
            }
            if let Err(e) = store.append_message(&chat, &model).await {
                warn!(error = %e, "failed to persist model message");
            }
        });
    }

    fn with_transcript<R>(&self, f: impl FnOnce(&mut Vec<DisplayMessage>) -> R) -> R {
        let mut transcript = self.transcript.lock().expect("transcript lock poisoned");
        f(&mut transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolError, ToolSpec};
    use crate::upload::AttachmentState;
    use crate::{ChunkStream, ModelBackend, ModelSession, RemoteFile, RemoteFileState, ToolResult};
    use async_trait::async_trait;
    use banter_common::{ChatPage, ChatSeed, StoreError};
    use futures_util::stream;
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc;

    type Chunks = Vec<Result<StreamChunk, EngineError>>;

    struct ScriptedBackend {
        streams: Arc<StdMutex<VecDeque<Chunks>>>,
        followups: Arc<StdMutex<Vec<Vec<ToolResult>>>>,
    }

    impl ScriptedBackend {
        fn new(streams: Vec<Chunks>) -> Self {
            Self {
                streams: Arc::new(StdMutex::new(streams.into_iter().collect())),
                followups: Arc::new(StdMutex::new(Vec::new())),
            }
        }
    }

    impl ModelBackend for ScriptedBackend {
        fn create_session(
            &self,
            history: Vec<Turn>,
            _system_instruction: Option<String>,
            _tools: Vec<ToolSpec>,
        ) -> Box<dyn ModelSession> {
            Box::new(ScriptedSession {
                streams: self.streams.clone(),
                followups: self.followups.clone(),
                history,
            })
        }
    }

    struct ScriptedSession {
        streams: Arc<StdMutex<VecDeque<Chunks>>>,
        followups: Arc<StdMutex<Vec<Vec<ToolResult>>>>,
        history: Vec<Turn>,
    }

    impl ScriptedSession {
        fn next_stream(&self) -> Result<ChunkStream, EngineError> {
            let chunks = self
                .streams
                .lock()
                .unwrap()
                .pop_front()
                .expect("script exhausted");
            Ok(Box::pin(stream::iter(chunks)))
        }
    }

    #[async_trait]
    impl ModelSession for ScriptedSession {
        async fn send_stream(&self, _parts: &[Part]) -> Result<ChunkStream, EngineError> {
            self.next_stream()
        }
        async fn send_followup(
            &self,
            results: &[ToolResult],
        ) -> Result<ChunkStream, EngineError> {
            self.followups.lock().unwrap().push(results.to_vec());
            self.next_stream()
        }
        fn history(&self) -> &[Turn] {
            &self.history
        }
        fn push_turn(&mut self, turn: Turn) {
            self.history.push(turn);
        }
    }

    struct ChannelBackend {
        rx: StdMutex<Option<mpsc::UnboundedReceiver<Result<StreamChunk, EngineError>>>>,
    }

    impl ChannelBackend {
        fn new() -> (
            Arc<Self>,
            mpsc::UnboundedSender<Result<StreamChunk, EngineError>>,
        ) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    rx: StdMutex::new(Some(rx)),
                }),
                tx,
            )
        }
    }

    impl ModelBackend for ChannelBackend {
        fn create_session(
            &self,
            history: Vec<Turn>,
            _system_instruction: Option<String>,
            _tools: Vec<ToolSpec>,
        ) -> Box<dyn ModelSession> {
            Box::new(ChannelSession {
                rx: StdMutex::new(self.rx.lock().unwrap().take()),
                history,
            })
        }
    }

    struct ChannelSession {
        rx: StdMutex<Option<mpsc::UnboundedReceiver<Result<StreamChunk, EngineError>>>>,
        history: Vec<Turn>,
    }

    #[async_trait]
    impl ModelSession for ChannelSession {
        async fn send_stream(&self, _parts: &[Part]) -> Result<ChunkStream, EngineError> {
            let rx = self.rx.lock().unwrap().take().expect("stream already taken");
            Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })))
        }
        async fn send_followup(
            &self,
            _results: &[ToolResult],
        ) -> Result<ChunkStream, EngineError> {
            Ok(Box::pin(stream::empty()))
        }
        fn history(&self) -> &[Turn] {
            &self.history
        }
        fn push_turn(&mut self, turn: Turn) {
            self.history.push(turn);
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        appended: StdMutex<Vec<NewMessage>>,
    }

    #[async_trait]
    impl HistoryStore for RecordingStore {
        async fn create_chat(&self, _seed: &ChatSeed) -> Result<ChatId, StoreError> {
            Ok(ChatId::from("c1"))
        }
        async fn append_message(
            &self,
            _chat: &ChatId,
            message: &NewMessage,
        ) -> Result<(), StoreError> {
            self.appended.lock().unwrap().push(message.clone());
            Ok(())
        }
        async fn store_attachment(
            &self,
            _chat: &ChatId,
            _path: &Path,
            _mime_type: &str,
        ) -> Result<String, StoreError> {
            Ok("https://store.example/files/1".into())
        }
        async fn messages(&self, _chat: &ChatId) -> Result<Vec<StoredMessage>, StoreError> {
            Ok(Vec::new())
        }
        async fn chats(&self, _page: u32) -> Result<ChatPage, StoreError> {
            Ok(ChatPage {
                items: Vec::new(),
                page: 0,
                total_pages: 0,
            })
        }
    }

    fn text_chunk(s: &str) -> Result<StreamChunk, EngineError> {
        Ok(StreamChunk::Text(s.into()))
    }

    fn tool_chunk(id: &str, name: &str) -> Result<StreamChunk, EngineError> {
        Ok(StreamChunk::ToolCalls(vec![ToolCall {
            id: id.into(),
            name: name.into(),
            args: serde_json::json!({}),
        }]))
    }

    fn orchestrator_with(backend: Arc<dyn ModelBackend>, registry: ToolRegistry) -> ChatOrchestrator {
        ChatOrchestrator::new(SessionManager::new(backend), registry)
            .with_flush_interval(Duration::ZERO)
    }

    fn echo_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolSpec::new("echo", "Echo.", serde_json::json!({}), &[]),
            Arc::new(|args: serde_json::Value| async move { Ok(args) }),
        );
        registry.register(
            ToolSpec::new("boom", "Fails.", serde_json::json!({}), &[]),
            Arc::new(|_args: serde_json::Value| async move {
                Err::<serde_json::Value, _>(ToolError::Failed("no service".into()))
            }),
        );
        registry
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn streamed_text_accumulates_into_final_turn() {
        let backend = Arc::new(ScriptedBackend::new(vec![vec![
            text_chunk("Olá"),
            text_chunk(", tudo"),
            text_chunk(" bem?"),
        ]]));
        let orch = orchestrator_with(backend, ToolRegistry::new());

        let outcome = orch.send(OutgoingMessage::text("oi")).await.unwrap();
        match outcome {
            SendOutcome::Completed(turn) => {
                assert_eq!(turn.text_content(), "Olá, tudo bem?");
            }
            other => panic!("expected completion, got {other:?}"),
        }

        let transcript = orch.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].content, "oi");
        assert_eq!(transcript[1].content, "Olá, tudo bem?");
        assert!(!orch.is_busy());
    }

    #[tokio::test]
    async fn tool_batch_dispatched_once_with_a_result_per_call() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            vec![
                tool_chunk("a", "echo"),
                tool_chunk("b", "boom"),
            ],
            vec![text_chunk("done")],
        ]));
        let followups = backend.followups.clone();
        let orch = orchestrator_with(backend, echo_registry());

        let outcome = orch.send(OutgoingMessage::text("go")).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Completed(_)));

        let batches = followups.lock().unwrap();
        assert_eq!(batches.len(), 1, "tool calls must be dispatched in one batch");
        let results = &batches[0];
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a");
        assert!(!results[0].is_error());
        assert_eq!(results[1].id, "b");
        assert!(results[1].is_error());
        assert_eq!(results[1].payload["message"], "no service");

        assert_eq!(orch.transcript()[1].content, "done");
    }

    #[tokio::test]
    async fn cancel_stops_consumption_at_a_chunk_boundary() {
        let (backend, tx) = ChannelBackend::new();
        let store = Arc::new(RecordingStore::default());
        let orch = Arc::new(
            orchestrator_with(backend, ToolRegistry::new())
                .with_store(store.clone(), ChatId::from("c1")),
        );
        let mut events = orch.subscribe();
        let handle = orch.cancel_handle();

        let task = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.send(OutgoingMessage::text("hi")).await })
        };

        for piece in ["A", "B", "C"] {
            tx.send(text_chunk(piece)).unwrap();
        }
        let mut flushes = 0;
        while flushes < 3 {
            if let SessionEvent::TextFlush { .. } = events.recv().await.unwrap() {
                flushes += 1;
            }
        }

        handle.cancel();
        tx.send(text_chunk("D")).unwrap();

        let outcome = task.await.unwrap().unwrap();
        assert!(matches!(outcome, SendOutcome::Cancelled));

        // partial text stays visible, nothing is persisted
        let transcript = orch.transcript();
        assert_eq!(transcript[1].content, "ABC");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.appended.lock().unwrap().is_empty());
        assert!(!orch.is_busy());
    }

    #[tokio::test]
    async fn stream_failure_shows_notice_and_leaves_orchestrator_usable() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            vec![Err(EngineError::Stream("connection reset".into()))],
            vec![text_chunk("recovered")],
        ]));
        let store = Arc::new(RecordingStore::default());
        let orch = orchestrator_with(backend, ToolRegistry::new())
            .with_store(store.clone(), ChatId::from("c1"));

        let outcome = orch.send(OutgoingMessage::text("first")).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Failed(EngineError::Stream(_))));
        assert_eq!(orch.transcript()[1].content, FAILURE_NOTICE);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.appended.lock().unwrap().is_empty());

        let outcome = orch.send(OutgoingMessage::text("second")).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Completed(_)));
        assert_eq!(orch.transcript()[3].content, "recovered");
    }

    #[tokio::test]
    async fn concurrent_send_rejected_while_busy() {
        let (backend, tx) = ChannelBackend::new();
        let orch = Arc::new(orchestrator_with(backend, ToolRegistry::new()));

        let task = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.send(OutgoingMessage::text("long")).await })
        };
        wait_until(|| orch.is_busy()).await;

        let err = orch.send(OutgoingMessage::text("again")).await.unwrap_err();
        assert!(matches!(err, EngineError::SessionBusy));

        drop(tx);
        let outcome = task.await.unwrap().unwrap();
        assert!(matches!(outcome, SendOutcome::Completed(_)));
        assert!(!orch.is_busy());
    }

    #[tokio::test]
    async fn completed_turn_persists_user_and_model_messages_in_order() {
        let backend = Arc::new(ScriptedBackend::new(vec![vec![text_chunk("answer")]]));
        let store = Arc::new(RecordingStore::default());
        let orch = orchestrator_with(backend, ToolRegistry::new())
            .with_store(store.clone(), ChatId::from("c1"));

        orch.send(OutgoingMessage::text("question")).await.unwrap();

        wait_until(|| store.appended.lock().unwrap().len() == 2).await;
        let appended = store.appended.lock().unwrap();
        assert_eq!(appended[0].entity, EntityRole::User);
        assert_eq!(appended[0].text, "question");
        assert_eq!(appended[1].entity, EntityRole::Assistant);
        assert_eq!(appended[1].text, "answer");
    }

    #[tokio::test]
    async fn tool_only_round_flushes_exactly_once_after_dispatch() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            vec![tool_chunk("a", "echo")],
            vec![text_chunk("the weather is fine")],
        ]));
        let orch = ChatOrchestrator::new(
            SessionManager::new(backend),
            echo_registry(),
        )
        .with_flush_interval(Duration::from_secs(3600));
        let mut events = orch.subscribe();

        orch.send(OutgoingMessage::text("weather?")).await.unwrap();

        let mut flushes = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::TextFlush { content } = event {
                flushes.push(content);
            }
        }
        assert_eq!(flushes, vec!["the weather is fine".to_string()]);
    }

    #[tokio::test]
    async fn round_cap_stops_tool_loops() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            vec![tool_chunk("a", "echo")],
            vec![tool_chunk("b", "echo")],
        ]));
        let followups = backend.followups.clone();
        let orch = orchestrator_with(backend, echo_registry()).with_max_tool_rounds(1);

        let outcome = orch.send(OutgoingMessage::text("loop")).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Completed(_)));
        assert_eq!(followups.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_message_rejected_without_touching_state() {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let orch = orchestrator_with(backend, ToolRegistry::new());

        let err = orch.send(OutgoingMessage::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::EmptyMessage));
        assert!(orch.transcript().is_empty());
        assert!(!orch.is_busy());
    }

    #[tokio::test]
    async fn unready_attachment_rejected_before_send() {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let orch = orchestrator_with(backend, ToolRegistry::new());

        let attachment = Attachment {
            local_path: PathBuf::from("/tmp/clip.wav"),
            display_name: "clip.wav".into(),
            mime_type: "audio/wav".into(),
            state: AttachmentState::Processing,
            remote: None,
            stored_url: None,
        };
        let message = OutgoingMessage::text("listen").with_attachment(attachment);

        let err = orch.send(message).await.unwrap_err();
        assert!(matches!(err, EngineError::AttachmentNotReady(_)));
        assert!(orch.transcript().is_empty());
    }

    #[tokio::test]
    async fn active_attachment_rides_along_and_is_persisted_with_url() {
        let backend = Arc::new(ScriptedBackend::new(vec![vec![text_chunk("heard it")]]));
        let store = Arc::new(RecordingStore::default());
        let orch = orchestrator_with(backend, ToolRegistry::new())
            .with_store(store.clone(), ChatId::from("c1"));

        let attachment = Attachment {
            local_path: PathBuf::from("/tmp/clip.wav"),
            display_name: "clip.wav".into(),
            mime_type: "audio/wav".into(),
            state: AttachmentState::Active,
            remote: Some(RemoteFile {
                id: "f1".into(),
                uri: "https://files.example/f1".into(),
                state: RemoteFileState::Active,
            }),
            stored_url: Some("https://store.example/files/9".into()),
        };

        orch.send(OutgoingMessage::text("listen").with_attachment(attachment))
            .await
            .unwrap();

        assert_eq!(
            orch.transcript()[0].file_url.as_deref(),
            Some("https://store.example/files/9")
        );
        wait_until(|| store.appended.lock().unwrap().len() == 2).await;
        let appended = store.appended.lock().unwrap();
        assert_eq!(
            appended[0].file_url.as_deref(),
            Some("https://store.example/files/9")
        );
        assert_eq!(appended[0].mime_type, "audio/wav");
    }

    #[tokio::test]
    async fn restore_fills_transcript_and_reset_clears_it() {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let orch = orchestrator_with(backend, ToolRegistry::new());

        let stored = vec![
            StoredMessage {
                id: "1".into(),
                entity: EntityRole::User,
                text: "oi".into(),
                mime_type: "text/plain".into(),
                file_url: None,
                created_at: String::new(),
            },
            StoredMessage {
                id: "2".into(),
                entity: EntityRole::Assistant,
                text: "olá!".into(),
                mime_type: "text/plain".into(),
                file_url: None,
                created_at: String::new(),
            },
        ];
        orch.restore(&stored).await;
        assert_eq!(orch.transcript().len(), 2);

        orch.reset().await;
        assert!(orch.transcript().is_empty());
    }
}
