pub mod errors;
pub mod events;
pub mod history;
pub mod id;
pub mod types;

pub use errors::{BanterError, CaptureError, ConfigError, StoreError};
pub use events::{EventBus, SessionEvent};
pub use history::HistoryStore;
pub use id::{new_correlation_id, new_id, ChatId};
pub use types::{
    ChatKind, ChatPage, ChatRecord, ChatSeed, EntityRole, NewMessage, StoredMessage,
};

pub type Result<T> = std::result::Result<T, BanterError>;
