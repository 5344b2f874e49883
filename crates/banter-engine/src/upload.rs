//! Attachment upload and bounded readiness polling.
//!
//! Uploaded files are not immediately usable; the service processes them
//! asynchronously. [`AttachmentUploader`] pushes a local file up, then
//! polls at a fixed interval until the file is active, failed, or the
//! attempt budget runs out.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use banter_common::{ChatId, HistoryStore};

use crate::{EngineError, FileStore, Part, RemoteFile, RemoteFileState};

/// Lifecycle of an attachment candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentState {
    Pending,
    Uploading,
    Processing,
    Active,
    Failed,
}

/// A local file prepared for sending with a turn.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub local_path: PathBuf,
    pub display_name: String,
    pub mime_type: String,
    pub state: AttachmentState,
    pub remote: Option<RemoteFile>,
    /// URL the history service stored the raw file under, when a bridge
    /// is attached.
    pub stored_url: Option<String>,
}

impl Attachment {
    /// Reference this attachment in an outgoing turn. Only active
    /// attachments with a remote resource may be embedded.
    pub fn to_part(&self) -> Result<Part, EngineError> {
        match (self.state, &self.remote) {
            (AttachmentState::Active, Some(remote)) => Ok(Part::File {
                uri: remote.uri.clone(),
                mime_type: self.mime_type.clone(),
            }),
            _ => Err(EngineError::AttachmentNotReady(self.display_name.clone())),
        }
    }
}

/// Fixed-interval, bounded polling policy.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval: Duration::from_secs(2),
        }
    }
}

/// How a readiness wait ended.
#[derive(Debug)]
pub enum PollOutcome {
    Ready(RemoteFile),
    Failed(String),
    TimedOut,
}

/// Injectable delay so polling is testable without real time.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Poll `store` until `file` leaves the processing state or the policy
/// budget is exhausted. Files already active or failed return without
/// polling.
pub async fn await_readiness(
    store: &dyn FileStore,
    file: RemoteFile,
    policy: PollPolicy,
    sleeper: &dyn Sleeper,
) -> Result<PollOutcome, EngineError> {
    match file.state {
        RemoteFileState::Active => return Ok(PollOutcome::Ready(file)),
        RemoteFileState::Failed => {
            return Ok(PollOutcome::Failed(format!(
                "file {} failed remote processing",
                file.id
            )))
        }
        RemoteFileState::Processing => {}
    }

    for attempt in 1..=policy.max_attempts {
        sleeper.sleep(policy.interval).await;
        let current = store.get_state(&file.id).await?;
        match current.state {
            RemoteFileState::Active => {
                debug!(id = %file.id, attempt, "file became active");
                return Ok(PollOutcome::Ready(current));
            }
            RemoteFileState::Failed => {
                return Ok(PollOutcome::Failed(format!(
                    "file {} failed remote processing",
                    file.id
                )))
            }
            RemoteFileState::Processing => {}
        }
    }

    Ok(PollOutcome::TimedOut)
}

/// Uploads local files to the model service and waits for them to become
/// active, optionally handing the raw bytes to the history service first.
pub struct AttachmentUploader {
    store: Arc<dyn FileStore>,
    bridge: Option<(Arc<dyn HistoryStore>, ChatId)>,
    max_file_bytes: u64,
    policy: PollPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl AttachmentUploader {
    pub fn new(store: Arc<dyn FileStore>, max_file_bytes: u64) -> Self {
        Self {
            store,
            bridge: None,
            max_file_bytes,
            policy: PollPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Also hand raw files to the history service before the remote
    /// transfer. Bridge failures are logged, not propagated.
    pub fn with_bridge(mut self, store: Arc<dyn HistoryStore>, chat: ChatId) -> Self {
        self.bridge = Some((store, chat));
        self
    }

    /// Upload one local file and wait until it is ready to send.
    ///
    /// The size ceiling is checked from local metadata before anything
    /// touches the network.
    pub async fn upload(&self, path: &Path) -> Result<Attachment, EngineError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| EngineError::File(format!("cannot stat {}: {e}", path.display())))?;

        let size = metadata.len();
        if size > self.max_file_bytes {
            return Err(EngineError::SizeExceeded {
                size,
                limit: self.max_file_bytes,
            });
        }

        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "attachment".to_string());
        let mime_type = guess_mime(&display_name).to_string();

        let stored_url = match &self.bridge {
            Some((history, chat)) => {
                match history.store_attachment(chat, path, &mime_type).await {
                    Ok(url) => Some(url),
                    Err(e) => {
                        warn!(error = %e, "history hand-off failed, continuing upload");
                        None
                    }
                }
            }
            None => None,
        };

        debug!(file = %display_name, size, mime = %mime_type, "uploading attachment");
        let remote = self.store.upload(path, &mime_type, &display_name).await?;

        let outcome =
            await_readiness(self.store.as_ref(), remote, self.policy, self.sleeper.as_ref())
                .await?;
        let remote = match outcome {
            PollOutcome::Ready(file) => file,
            PollOutcome::Failed(reason) => return Err(EngineError::ProcessingFailed(reason)),
            PollOutcome::TimedOut => {
                return Err(EngineError::ReadinessTimeout {
                    attempts: self.policy.max_attempts,
                })
            }
        };

        Ok(Attachment {
            local_path: path.to_path_buf(),
            display_name,
            mime_type,
            state: AttachmentState::Active,
            remote: Some(remote),
            stored_url,
        })
    }
}

/// Infer a mime type from the file extension.
pub fn guess_mime(filename: &str) -> &'static str {
    let ext = filename
        .rsplit('.')
        .next()
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        Some("mp3") => "audio/mpeg",
        Some("m4a") => "audio/mp4",
        Some("ogg") => "audio/ogg",
        Some("wav") => "audio/wav",
        Some("mp4") => "video/mp4",
        Some("txt") | Some("md") => "text/plain",
        _ => "application/octet-stream",
    }
}
