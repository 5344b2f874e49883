//! Capture devices.
//!
//! [`ProcessDevice`] records by spawning an external command (sox,
//! ffmpeg, arecord) that writes the clip to a file and stops cleanly on
//! SIGINT.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use banter_common::CaptureError;

/// A finished capture on disk.
#[derive(Debug, Clone)]
pub struct CapturedFile {
    pub path: PathBuf,
    pub mime_type: String,
}

/// Something that can capture audio into a file.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Begin capturing to `output`. Fails with
    /// [`CaptureError::DeviceUnavailable`] when the device cannot be
    /// acquired.
    async fn acquire(&self, output: &Path) -> Result<(), CaptureError>;

    /// Stop capturing and finalize the output file.
    async fn release(&self) -> Result<CapturedFile, CaptureError>;
}

/// Capture device backed by an external recording command.
///
/// The argument list is a template; every occurrence of `{output}` is
/// replaced with the target path before spawning.
pub struct ProcessDevice {
    command: String,
    args: Vec<String>,
    mime_type: String,
    active: Mutex<Option<(Child, PathBuf)>>,
}

impl ProcessDevice {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            mime_type: "audio/wav".to_string(),
            active: Mutex::new(None),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }
}

#[async_trait]
impl CaptureDevice for ProcessDevice {
    async fn acquire(&self, output: &Path) -> Result<(), CaptureError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(CaptureError::DeviceUnavailable(
                "capture already in progress".to_string(),
            ));
        }

        let args = substitute_output(&self.args, output);
        debug!(command = %self.command, ?args, "spawning capture process");

        let mut child = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::DeviceUnavailable(format!("{}: {e}", self.command)))?;

        // Commands like sox fail within moments when no input device
        // exists; give the process a beat and check it survived.
        tokio::time::sleep(Duration::from_millis(150)).await;
        if child.try_wait()?.is_some() {
            let output = child.wait_with_output().await?;
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CaptureError::DeviceUnavailable(format!(
                "{} exited: {}",
                self.command,
                stderr.trim()
            )));
        }

        *active = Some((child, output.to_path_buf()));
        Ok(())
    }

    async fn release(&self) -> Result<CapturedFile, CaptureError> {
        let Some((mut child, path)) = self.active.lock().await.take() else {
            return Err(CaptureError::CaptureFailed(
                "no active capture".to_string(),
            ));
        };

        // Interrupt only if the process is still running, so recorders
        // that finished on their own are just reaped.
        if child.try_wait()?.is_none() {
            interrupt(&mut child).await?;
        }

        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(result) => {
                let status = result?;
                debug!(?status, "capture process finished");
            }
            Err(_) => {
                warn!("capture process ignored SIGINT, killing it");
                child.kill().await?;
            }
        }

        let metadata = tokio::fs::metadata(&path).await.map_err(|e| {
            CaptureError::CaptureFailed(format!("no output at {}: {e}", path.display()))
        })?;
        if metadata.len() == 0 {
            return Err(CaptureError::CaptureFailed(format!(
                "empty capture at {}",
                path.display()
            )));
        }

        Ok(CapturedFile {
            path,
            mime_type: self.mime_type.clone(),
        })
    }
}

/// SIGINT lets recording commands finalize their output headers; a plain
/// kill would leave a truncated file.
#[cfg(unix)]
async fn interrupt(child: &mut Child) -> Result<(), CaptureError> {
    if let Some(pid) = child.id() {
        let status = Command::new("kill")
            .arg("-INT")
            .arg(pid.to_string())
            .status()
            .await?;
        if status.success() {
            return Ok(());
        }
    }
    child.start_kill()?;
    Ok(())
}

#[cfg(not(unix))]
async fn interrupt(child: &mut Child) -> Result<(), CaptureError> {
    child.start_kill()?;
    Ok(())
}

fn substitute_output(args: &[String], output: &Path) -> Vec<String> {
    let output = output.to_string_lossy();
    args.iter()
        .map(|arg| arg.replace("{output}", &output))
        .collect()
}
