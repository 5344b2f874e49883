//! Files API client for attachment storage on the model service.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::{EngineError, FileStore, RemoteFile, RemoteFileState};

use super::client::GeminiClient;

#[async_trait]
impl FileStore for GeminiClient {
    async fn upload(
        &self,
        path: &Path,
        mime_type: &str,
        display_name: &str,
    ) -> Result<RemoteFile, EngineError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| EngineError::File(format!("cannot read {}: {e}", path.display())))?;

        debug!(file = display_name, size = bytes.len(), mime = mime_type, "uploading to Files API");

        let metadata = serde_json::json!({ "file": { "displayName": display_name } });
        let metadata_part = reqwest::multipart::Part::text(metadata.to_string())
            .mime_str("application/json")
            .map_err(|e| EngineError::Api(e.to_string()))?;
        let file_part = reqwest::multipart::Part::bytes(bytes)
            .file_name(display_name.to_string())
            .mime_str(mime_type)
            .map_err(|e| EngineError::Api(e.to_string()))?;

        let form = reqwest::multipart::Form::new()
            .part("metadata", metadata_part)
            .part("file", file_part);

        let response = self
            .http
            .post(self.upload_url())
            .query(&[("uploadType", "multipart")])
            .header("x-goog-api-key", &self.config.api_key)
            .multipart(form)
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

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::Parse(e.to_string()))?;

        parse_remote_file(&json["file"])
    }

    async fn get_state(&self, id: &str) -> Result<RemoteFile, EngineError> {
        let response = self
            .http
            .get(self.file_url(id))
            .header("x-goog-api-key", &self.config.api_key)
            .send()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::Api(format!("HTTP {status}: {text}")));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::Parse(e.to_string()))?;

        parse_remote_file(&json)
    }
}

/// Parse a Files API resource object.
pub(crate) fn parse_remote_file(json: &serde_json::Value) -> Result<RemoteFile, EngineError> {
    let name = json["name"]
        .as_str()
        .ok_or_else(|| EngineError::Parse("file resource has no name".to_string()))?;
    let id = name.strip_prefix("files/").unwrap_or(name).to_string();
    let uri = json["uri"].as_str().unwrap_or_default().to_string();

    let state = match json["state"].as_str() {
        Some("ACTIVE") => RemoteFileState::Active,
        Some("FAILED") => RemoteFileState::Failed,
        // PROCESSING, STATE_UNSPECIFIED, or absent
        _ => RemoteFileState::Processing,
    };

    Ok(RemoteFile { id, uri, state })
}
