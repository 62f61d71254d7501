//! Camera driven through external commands (`rpicam-still`, `rpicam-hello`).
//!
//! The preview is a long-running child process that is killed to stop it. The
//! camera can only be opened by one process at a time, so a capture pauses an
//! active preview and restarts it afterwards.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::config::CameraSettings;
use crate::hardware::capabilities::{CaptureSink, Previewable};

/// Camera controlled by spawning the configured capture and preview commands.
pub struct CommandCamera {
    capture_command: Vec<String>,
    preview_command: Vec<String>,
    width: u32,
    height: u32,
    preview: Mutex<Option<Child>>,
}

impl CommandCamera {
    /// Camera using the command templates from `settings`.
    pub fn new(settings: &CameraSettings) -> Self {
        Self {
            capture_command: settings.capture_command.clone(),
            preview_command: settings.preview_command.clone(),
            width: settings.width,
            height: settings.height,
            preview: Mutex::new(None),
        }
    }

    /// Substitute `{path}`, `{width}` and `{height}` in a command template.
    fn expand(&self, template: &[String], path: Option<&Path>) -> Result<Command> {
        let (program, args) = template
            .split_first()
            .ok_or_else(|| anyhow!("camera command is empty"))?;
        let path = path.map(|p| p.display().to_string()).unwrap_or_default();
        let mut command = Command::new(program);
        for arg in args {
            command.arg(
                arg.replace("{path}", &path)
                    .replace("{width}", &self.width.to_string())
                    .replace("{height}", &self.height.to_string()),
            );
        }
        command.stdin(Stdio::null()).stdout(Stdio::null());
        Ok(command)
    }

    fn spawn_preview(&self, slot: &mut Option<Child>) -> Result<()> {
        let child = self
            .expand(&self.preview_command, None)?
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start preview {:?}", self.preview_command))?;
        tracing::debug!(pid = child.id(), "camera preview started");
        *slot = Some(child);
        Ok(())
    }

    async fn kill_preview(slot: &mut Option<Child>) -> Result<()> {
        if let Some(mut child) = slot.take() {
            // An already exited preview has nothing left to kill.
            if child.try_wait()?.is_none() {
                child.kill().await.context("failed to stop preview")?;
            }
            tracing::debug!("camera preview stopped");
        }
        Ok(())
    }
}

#[async_trait]
impl Previewable for CommandCamera {
    async fn start_preview(&self) -> Result<()> {
        let mut slot = self.preview.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        self.spawn_preview(&mut slot)
    }

    async fn stop_preview(&self) -> Result<()> {
        let mut slot = self.preview.lock().await;
        Self::kill_preview(&mut slot).await
    }
}

#[async_trait]
impl CaptureSink for CommandCamera {
    async fn capture(&self, path: &Path) -> Result<()> {
        let mut slot = self.preview.lock().await;
        let resume_preview = slot.is_some();
        Self::kill_preview(&mut slot).await?;

        let output = self
            .expand(&self.capture_command, Some(path))?
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("failed to run {:?}", self.capture_command))?;

        if resume_preview {
            self.spawn_preview(&mut slot)?;
        }

        if !output.status.success() {
            bail!(
                "capture of {} failed ({}): {}",
                path.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        tracing::debug!(path = %path.display(), "image captured");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn settings(capture: &[&str]) -> CameraSettings {
        CameraSettings {
            capture_command: capture.iter().map(|s| s.to_string()).collect(),
            preview_command: vec!["sleep".into(), "30".into()],
            ..CameraSettings::default()
        }
    }

    #[tokio::test]
    async fn capture_substitutes_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let camera = CommandCamera::new(&settings(&[
            "sh",
            "-c",
            "echo \"$1x$2\" > \"$0\"",
            "{path}",
            "{width}",
            "{height}",
        ]));
        let path = dir.path().join("A1.jpg");
        camera.capture(&path).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), "1640x1232");
    }

    #[tokio::test]
    async fn failed_capture_reports_stderr() {
        let camera = CommandCamera::new(&settings(&["sh", "-c", "echo no camera >&2; exit 3"]));
        let err = camera.capture(Path::new("A1.jpg")).await.unwrap_err();
        assert!(err.to_string().contains("no camera"), "{err}");
    }

    #[tokio::test]
    async fn preview_survives_a_capture() {
        let dir = tempfile::tempdir().unwrap();
        let camera = CommandCamera::new(&settings(&["touch", "{path}"]));
        camera.start_preview().await.unwrap();
        camera.capture(&dir.path().join("B2.jpg")).await.unwrap();
        assert!(camera.preview.lock().await.is_some());
        camera.stop_preview().await.unwrap();
        assert!(camera.preview.lock().await.is_none());
        camera.stop_preview().await.unwrap();
    }
}
