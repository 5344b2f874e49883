use async_trait::async_trait;
use std::path::Path;

use crate::errors::StoreError;
use crate::id::ChatId;
use crate::types::{ChatPage, ChatSeed, NewMessage, StoredMessage};

/// Narrow interface to the chat-history service.
///
/// Callers treat every write as best-effort: a failed append must never
/// abort the conversational flow that produced the message.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Create a chat record and return its id.
    async fn create_chat(&self, seed: &ChatSeed) -> Result<ChatId, StoreError>;

    /// Append one finalized message to a chat record.
    async fn append_message(&self, chat: &ChatId, message: &NewMessage) -> Result<(), StoreError>;

    /// Store a raw local file under a chat record, returning the url the
    /// service will serve it from.
    async fn store_attachment(
        &self,
        chat: &ChatId,
        path: &Path,
        mime_type: &str,
    ) -> Result<String, StoreError>;

    /// Full ordered message list for a chat record, oldest first.
    async fn messages(&self, chat: &ChatId) -> Result<Vec<StoredMessage>, StoreError>;

    /// One page of chat records, newest first.
    async fn chats(&self, page: u32) -> Result<ChatPage, StoreError>;
}
