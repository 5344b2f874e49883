//! Streaming session implementation over the Gemini API.

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::sse::parse_sse_stream;
use crate::tools::ToolSpec;
use crate::{
    ChunkStream, EngineError, ModelBackend, ModelSession, Part, ToolResult, Turn,
};

use super::client::GeminiClient;

impl ModelBackend for GeminiClient {
    fn create_session(
        &self,
        history: Vec<Turn>,
        system_instruction: Option<String>,
        tools: Vec<ToolSpec>,
    ) -> Box<dyn ModelSession> {
        Box::new(GeminiSession {
            client: self.clone(),
            history,
            system_instruction,
            tools,
        })
    }
}

/// One conversation context against the Gemini API.
pub struct GeminiSession {
    client: GeminiClient,
    history: Vec<Turn>,
    system_instruction: Option<String>,
    tools: Vec<ToolSpec>,
}

impl GeminiSession {
    /// POST the request and pump the SSE body into a chunk stream.
    async fn open_stream(&self, pending: Turn) -> Result<ChunkStream, EngineError> {
        let body = self.client.build_request_body(
            &self.history,
            &pending,
            self.system_instruction.as_deref(),
            &self.tools,
        );

        debug!(
            model = %self.client.config.model,
            turns = self.history.len(),
            "opening streamed exchange"
        );

        let response = self
            .client
            .http
            .post(self.client.stream_url())
            .header("x-goog-api-key", &self.client.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(EngineError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::Api(format!("HTTP {status}: {text}")));
        }

        let client = self.client.clone();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let pumped = parse_sse_stream(response, |event| {
                match serde_json::from_str::<serde_json::Value>(&event.data) {
                    Ok(json) => {
                        if let Some(chunk) = client.parse_chunk(&json) {
                            let _ = tx.send(Ok(chunk));
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(EngineError::Parse(e.to_string())));
                    }
                }
            })
            .await;

            if let Err(e) = pumped {
                let _ = tx.send(Err(e));
            }
        });

        Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }
}

#[async_trait]
impl ModelSession for GeminiSession {
    async fn send_stream(&self, parts: &[Part]) -> Result<ChunkStream, EngineError> {
        self.open_stream(Turn::user(parts.to_vec())).await
    }

    async fn send_followup(&self, results: &[ToolResult]) -> Result<ChunkStream, EngineError> {
        let parts: Vec<Part> = results
            .iter()
            .cloned()
            .map(Part::FunctionResponse)
            .collect();
        self.open_stream(Turn::user(parts)).await
    }

    fn history(&self) -> &[Turn] {
        &self.history
    }

    fn push_turn(&mut self, turn: Turn) {
        self.history.push(turn);
    }
}
