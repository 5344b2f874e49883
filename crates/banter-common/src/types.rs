use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a persisted message as the history service stores it. The model
/// service uses its own vocabulary ("model" instead of "assistant"); that
/// relabeling happens at the engine's wire layer, never here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityRole {
    User,
    Assistant,
}

impl EntityRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityRole::User => "user",
            EntityRole::Assistant => "assistant",
        }
    }
}

impl fmt::Display for EntityRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChatKind {
    General,
    Persona,
}

impl Default for ChatKind {
    fn default() -> Self {
        ChatKind::General
    }
}

/// Payload for creating a chat record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSeed {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: ChatKind,
}

impl ChatSeed {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persona_id: None,
            kind: ChatKind::General,
        }
    }

    pub fn with_persona(mut self, persona_id: impl Into<String>) -> Self {
        self.persona_id = Some(persona_id.into());
        self.kind = ChatKind::Persona;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub persona_id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: ChatKind,
    #[serde(default)]
    pub created_at: String,
}

/// Payload for appending one finalized message to a chat record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub entity: EntityRole,
    pub text: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
}

impl NewMessage {
    pub fn text(entity: EntityRole, text: impl Into<String>) -> Self {
        Self {
            entity,
            text: text.into(),
            mime_type: "text/plain".into(),
            file_url: None,
        }
    }

    pub fn with_file(mut self, file_url: impl Into<String>, mime_type: impl Into<String>) -> Self {
        self.file_url = Some(file_url.into());
        self.mime_type = mime_type.into();
        self
    }
}

/// One message as the history service returns it, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    #[serde(default)]
    pub id: String,
    pub entity: EntityRole,
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub created_at: String,
}

fn default_mime_type() -> String {
    "text/plain".into()
}

impl StoredMessage {
    pub fn text(entity: EntityRole, text: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            entity,
            text: text.into(),
            mime_type: default_mime_type(),
            file_url: None,
            created_at: String::new(),
        }
    }
}

/// One page of chat records from the listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPage {
    pub items: Vec<ChatRecord>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub total_pages: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_role_wire_form_is_lowercase() {
        assert_eq!(serde_json::to_string(&EntityRole::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&EntityRole::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[test]
    fn entity_role_display() {
        assert_eq!(EntityRole::User.to_string(), "user");
        assert_eq!(EntityRole::Assistant.to_string(), "assistant");
    }

    #[test]
    fn chat_seed_serializes_kind_as_type() {
        let seed = ChatSeed::new("Morning chat").with_persona("p-1");
        let json = serde_json::to_value(&seed).unwrap();
        assert_eq!(json["name"], "Morning chat");
        assert_eq!(json["personaId"], "p-1");
        assert_eq!(json["type"], "PERSONA");
    }

    #[test]
    fn chat_seed_without_persona_omits_field() {
        let seed = ChatSeed::new("Scratch");
        let json = serde_json::to_string(&seed).unwrap();
        assert!(!json.contains("personaId"));
        assert!(json.contains("GENERAL"));
    }

    #[test]
    fn new_message_text_defaults_mime() {
        let msg = NewMessage::text(EntityRole::User, "hello");
        assert_eq!(msg.mime_type, "text/plain");
        assert!(msg.file_url.is_none());

        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("fileUrl"));
    }

    #[test]
    fn new_message_with_file_carries_url_and_mime() {
        let msg = NewMessage::text(EntityRole::User, "voice note")
            .with_file("https://cdn.example/a.wav", "audio/wav");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["fileUrl"], "https://cdn.example/a.wav");
        assert_eq!(json["mimeType"], "audio/wav");
    }

    #[test]
    fn stored_message_deserializes_camel_case() {
        let json = r#"{
            "id": "m-1",
            "entity": "assistant",
            "text": "hello there",
            "mimeType": "text/plain",
            "fileUrl": null,
            "createdAt": "2025-01-05T12:00:00Z"
        }"#;
        let msg: StoredMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.entity, EntityRole::Assistant);
        assert_eq!(msg.text, "hello there");
        assert_eq!(msg.created_at, "2025-01-05T12:00:00Z");
    }

    #[test]
    fn stored_message_tolerates_missing_optional_fields() {
        let json = r#"{"entity": "user"}"#;
        let msg: StoredMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.entity, EntityRole::User);
        assert_eq!(msg.text, "");
        assert_eq!(msg.mime_type, "text/plain");
        assert!(msg.file_url.is_none());
    }

    #[test]
    fn chat_record_kind_defaults_to_general() {
        let json = r#"{"id": "c-1", "name": "untitled"}"#;
        let record: ChatRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.kind, ChatKind::General);
        assert!(record.persona_id.is_none());
    }

    #[test]
    fn chat_page_deserializes() {
        let json = r#"{
            "items": [{"id": "c-1", "name": "first"}, {"id": "c-2", "name": "second"}],
            "page": 0,
            "totalPages": 3
        }"#;
        let page: ChatPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items[1].id, "c-2");
    }
}
