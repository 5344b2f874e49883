//! HTTP client, request construction, and response-chunk parsing.

use banter_common::new_correlation_id;

use crate::tools::{to_function_declaration, ToolSpec};
use crate::{Part, StreamChunk, ToolCall, Turn};

use super::config::GeminiConfig;

/// Gemini API client. Cheap to clone; the inner HTTP client is shared.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    pub(crate) config: GeminiConfig,
    pub(crate) http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::builder()
                .connect_timeout(std::time::Duration::from_secs(10))
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .expect("failed to build HTTP client"),
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub(crate) fn stream_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.config.api_base, self.config.model
        )
    }

    pub(crate) fn upload_url(&self) -> String {
        format!("{}/upload/v1beta/files", self.config.api_base)
    }

    pub(crate) fn file_url(&self, id: &str) -> String {
        // the wire name of a resource is "files/{id}"; id here is bare
        format!("{}/v1beta/files/{}", self.config.api_base, id)
    }

    /// Build the request body for a streamed exchange: committed history
    /// plus the pending turn, with optional system instruction and tool
    /// declarations.
    pub(crate) fn build_request_body(
        &self,
        history: &[Turn],
        pending: &Turn,
        system_instruction: Option<&str>,
        tools: &[ToolSpec],
    ) -> serde_json::Value {
        let mut contents: Vec<serde_json::Value> = history.iter().map(content_from_turn).collect();
        contents.push(content_from_turn(pending));

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "temperature": self.config.temperature,
                "maxOutputTokens": self.config.max_output_tokens,
            },
        });

        if let Some(instruction) = system_instruction {
            body["systemInstruction"] = serde_json::json!({
                "parts": [{ "text": instruction }]
            });
        }

        if !tools.is_empty() {
            let declarations: Vec<serde_json::Value> =
                tools.iter().map(to_function_declaration).collect();
            body["tools"] = serde_json::json!([
                { "functionDeclarations": declarations }
            ]);
        }

        body
    }

    /// Parse one streamed response object into a chunk.
    ///
    /// Any function call makes the whole chunk a tool-call chunk; text
    /// riding along in the same chunk is dropped. Chunks with neither
    /// yield `None`.
    pub(crate) fn parse_chunk(&self, json: &serde_json::Value) -> Option<StreamChunk> {
        let parts = json["candidates"][0]["content"]["parts"].as_array()?;

        let mut text = String::new();
        let mut calls = Vec::new();

        for part in parts {
            if let Some(piece) = part["text"].as_str() {
                text.push_str(piece);
            }
            if let Some(call) = part.get("functionCall") {
                calls.push(ToolCall {
                    id: call["id"]
                        .as_str()
                        .map(String::from)
                        .unwrap_or_else(new_correlation_id),
                    name: call["name"].as_str().unwrap_or_default().to_string(),
                    args: call["args"].clone(),
                });
            }
        }

        if !calls.is_empty() {
            Some(StreamChunk::ToolCalls(calls))
        } else if !text.is_empty() {
            Some(StreamChunk::Text(text))
        } else {
            None
        }
    }
}

/// Serialize one turn as a Gemini content object.
pub(crate) fn content_from_turn(turn: &Turn) -> serde_json::Value {
    let parts: Vec<serde_json::Value> = turn
        .parts
        .iter()
        .map(|part| match part {
            Part::Text(text) => serde_json::json!({ "text": text }),
            Part::File { uri, mime_type } => serde_json::json!({
                "fileData": { "fileUri": uri, "mimeType": mime_type }
            }),
            Part::FunctionCall(call) => serde_json::json!({
                "functionCall": { "name": call.name, "args": call.args }
            }),
            Part::FunctionResponse(result) => serde_json::json!({
                "functionResponse": {
                    "name": result.name,
                    "response": wrap_response(&result.payload),
                }
            }),
        })
        .collect();

    serde_json::json!({
        "role": turn.role.as_str(),
        "parts": parts,
    })
}

// functionResponse.response must be a JSON object on the wire.
fn wrap_response(payload: &serde_json::Value) -> serde_json::Value {
    if payload.is_object() {
        payload.clone()
    } else {
        serde_json::json!({ "result": payload })
    }
}
