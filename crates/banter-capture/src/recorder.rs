//! Recording state machine with an elapsed-time ticker.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use banter_common::CaptureError;

use crate::device::CaptureDevice;

/// A finished recording, ready to hand to the attachment uploader.
#[derive(Debug, Clone)]
pub struct RecordedClip {
    pub path: PathBuf,
    pub mime_type: String,
    pub duration: Duration,
}

struct ActiveRecording {
    started_at: Instant,
    elapsed_tx: Arc<watch::Sender<String>>,
    ticker: JoinHandle<()>,
}

impl Drop for ActiveRecording {
    fn drop(&mut self) {
        self.ticker.abort();
    }
}

/// Two-state recorder: idle or recording.
///
/// `start` acquires the device and spawns a one-second ticker that
/// publishes the elapsed time as `mm:ss` over a watch channel; `stop`
/// releases the device and yields the clip. Any failure returns the
/// recorder to idle.
pub struct Recorder {
    device: Arc<dyn CaptureDevice>,
    output_dir: PathBuf,
    active: Option<ActiveRecording>,
}

impl Recorder {
    pub fn new(device: Arc<dyn CaptureDevice>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            device,
            output_dir: output_dir.into(),
            active: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Begin a recording. The returned receiver observes the elapsed
    /// display, starting at `00:00`.
    pub async fn start(&mut self) -> Result<watch::Receiver<String>, CaptureError> {
        if self.active.is_some() {
            return Err(CaptureError::CaptureFailed(
                "recording already in progress".to_string(),
            ));
        }

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let filename = format!("clip-{}.wav", chrono::Local::now().format("%Y%m%d-%H%M%S"));
        let path = self.output_dir.join(filename);

        self.device.acquire(&path).await?;
        info!(path = %path.display(), "recording started");

        let started_at = Instant::now();
        let (tx, rx) = watch::channel(format_elapsed(0));
        let elapsed_tx = Arc::new(tx);
        let ticker_tx = elapsed_tx.clone();
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.tick().await;
            loop {
                interval.tick().await;
                let elapsed = started_at.elapsed().as_secs();
                // send_replace keeps the value fresh for late subscribers
                // even while nobody holds a receiver
                ticker_tx.send_replace(format_elapsed(elapsed));
            }
        });

        self.active = Some(ActiveRecording {
            started_at,
            elapsed_tx,
            ticker,
        });
        Ok(rx)
    }

    /// Elapsed time of the recording in progress, `None` while idle.
    pub fn elapsed(&self) -> Option<Duration> {
        self.active.as_ref().map(|active| active.started_at.elapsed())
    }

    /// A fresh receiver for the elapsed `mm:ss` display, `None` while idle.
    pub fn subscribe_elapsed(&self) -> Option<watch::Receiver<String>> {
        self.active.as_ref().map(|active| active.elapsed_tx.subscribe())
    }

    /// Stop the recording and finalize the clip. Stopping while idle is
    /// a no-op and yields `None`. The recorder is idle again afterwards
    /// whether or not the release succeeds.
    pub async fn stop(&mut self) -> Result<Option<RecordedClip>, CaptureError> {
        let Some(active) = self.active.take() else {
            return Ok(None);
        };

        let captured = self.device.release().await?;
        let duration = active.started_at.elapsed();
        debug!(path = %captured.path.display(), ?duration, "recording stopped");

        Ok(Some(RecordedClip {
            path: captured.path,
            mime_type: captured.mime_type,
            duration,
        }))
    }
}

/// Render elapsed seconds as `mm:ss`. Minutes keep growing past an hour;
/// the display is a stopwatch, not a clock.
pub fn format_elapsed(total_seconds: u64) -> String {
    format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
}
