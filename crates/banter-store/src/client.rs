//! The history service client.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use banter_common::{
    ChatId, ChatPage, ChatRecord, ChatSeed, HistoryStore, NewMessage, StoreError, StoredMessage,
};

/// Response of the raw file upload endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileUploadResponse {
    file_url: String,
}

/// Client for the chat history REST service.
pub struct StoreClient {
    base_url: String,
    http: reqwest::Client,
}

impl StoreClient {
    /// Create a client for the service at `base_url` (with or without a
    /// trailing slash).
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            http: reqwest::Client::builder()
                .connect_timeout(std::time::Duration::from_secs(5))
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("failed to build HTTP client"),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl HistoryStore for StoreClient {
    async fn create_chat(&self, seed: &ChatSeed) -> Result<ChatId, StoreError> {
        let response = self
            .http
            .post(self.url("chat"))
            .json(seed)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        let record: ChatRecord = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        debug!(chat = %record.id, name = %record.name, "chat record created");
        Ok(ChatId::from(record.id))
    }

    async fn append_message(&self, chat: &ChatId, message: &NewMessage) -> Result<(), StoreError> {
        let response = self
            .http
            .post(self.url(&format!("message/{chat}")))
            .json(message)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        Self::check(response).await?;
        Ok(())
    }

    async fn store_attachment(
        &self,
        chat: &ChatId,
        path: &Path,
        mime_type: &str,
    ) -> Result<String, StoreError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::Network(format!("cannot read {}: {e}", path.display())))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "attachment".to_string());

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str(mime_type)
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(self.url(&format!("message/{chat}/file")))
            .multipart(form)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        let uploaded: FileUploadResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        Ok(uploaded.file_url)
    }

    async fn messages(&self, chat: &ChatId) -> Result<Vec<StoredMessage>, StoreError> {
        let response = self
            .http
            .get(self.url(&format!("message/{chat}")))
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn chats(&self, page: u32) -> Result<ChatPage, StoreError> {
        let response = self
            .http
            .get(self.url("chat"))
            .query(&[("page", page)])
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }
}
