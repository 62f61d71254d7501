//! Full-plate imaging run.
//!
//! Every sample is visited in row, column, sub-sample order and a focus stack
//! is captured at each. The run:
//!
//! 1. moves to A1 and creates `<plate>/<timestamp>/rawimages`
//! 2. saves the plate configuration in effect as `plate.toml` in the run directory
//! 3. opens the preview (with a settle pause) if it was closed
//! 4. opens `process<plate_id>.com` and, if configured, disables hard limits
//! 5. captures every sample, checking for cancellation after each one
//!
//! Whatever way the loop ends (completion, cancellation or a fault) the
//! script is closed, preview and both lights are switched off and hard limits
//! are re-enabled if they were disabled, each exactly once.

use ami_core::{AmiError, AmiResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::{ControllerState, Cursor, DeviceController};
use crate::layout::{timestamp_now, ImageLayout, RunDirs};
use crate::script::StackScript;

/// Outcome of a plate run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Samples whose stack was fully captured
    pub samples_completed: usize,
    /// Samples skipped because they resolve outside the travel box
    pub samples_skipped: usize,
    /// Images written
    pub images_captured: usize,
    /// Whether the run stopped on request
    pub cancelled: bool,
    /// `<plate>/<timestamp>`
    pub run_dir: PathBuf,
    /// Stack-merge script
    pub script: PathBuf,
}

/// Resources and counters of a run in progress.
#[derive(Default)]
struct RunProgress {
    dirs: Option<RunDirs>,
    script: Option<StackScript>,
    script_path: Option<PathBuf>,
    hard_limits_disabled: bool,
    samples_completed: usize,
    samples_skipped: usize,
    images_captured: usize,
    cancelled: bool,
}

impl DeviceController {
    /// Image the whole plate.
    ///
    /// Returns once the run has finished, been cancelled through
    /// [`RunHandle::request_cancel`](super::RunHandle::request_cancel), or
    /// failed; hardware is left safe in every case.
    pub async fn run_plate(&mut self) -> AmiResult<RunSummary> {
        let ready = self.plate.check_corners();
        self.reported(ready)?;
        self.calibration_target = None;

        self.run.begin();
        self.set_state(ControllerState::RunningBatch);
        self.report("imaging samples...");
        tracing::info!(
            samples = self.plate.total_samples(),
            images_per_sample = self.plate.n_focus_images,
            "plate run started"
        );

        let mut progress = RunProgress::default();
        let outcome = self.image_plate(&mut progress).await;
        let cleanup = self.finish_run(&mut progress).await;
        self.run.finish();
        self.settle_state();

        self.reported(outcome)?;
        cleanup?;

        let summary = RunSummary {
            samples_completed: progress.samples_completed,
            samples_skipped: progress.samples_skipped,
            images_captured: progress.images_captured,
            cancelled: progress.cancelled,
            run_dir: progress.dirs.map(|d| d.root).unwrap_or_default(),
            script: progress.script_path.unwrap_or_default(),
        };
        if summary.cancelled {
            self.report(&format!(
                "run stopped after {} samples",
                summary.samples_completed
            ));
        } else {
            self.report(&format!(
                "run complete: {} samples, {} images in {}",
                summary.samples_completed,
                summary.images_captured,
                summary.run_dir.display()
            ));
        }
        tracing::info!(?summary, "plate run finished");
        Ok(summary)
    }

    async fn image_plate(&mut self, progress: &mut RunProgress) -> AmiResult<()> {
        self.navigate(Cursor::default()).await?;

        let dirs = ImageLayout::new(&self.options.images_root, &self.plate)
            .run_dirs(&timestamp_now())
            .await?;
        self.plate.save(dirs.root.join("plate.toml"))?;
        let script_path = dirs.root.join(format!("process{}.com", self.plate.plate_id));
        let raw_dir = dirs.raw.clone();
        progress.dirs = Some(dirs);

        if !self.viewing {
            self.set_preview(true).await?;
            sleep(self.options.preview_settle).await;
        }

        progress.script = Some(StackScript::create(&script_path).await?);
        progress.script_path = Some(script_path);

        if self.options.disable_hard_limits {
            progress.hard_limits_disabled = true;
            self.hw.motion.hard_limits(false).await?;
            tracing::info!("hard limits disabled for the run");
        }

        let order: Vec<Cursor> = self
            .plate
            .sample_order()
            .map(|(row, col, sample)| Cursor { row, col, sample })
            .collect();
        for at in order {
            let label = ami_core::sample_label(&self.plate, at.row, at.col, at.sample);
            match self.image_sample(at, &raw_dir, &label).await {
                Ok(images) => {
                    if let Some(script) = progress.script.as_mut() {
                        script.append_series(&label, &images, &label).await?;
                    }
                    progress.samples_completed += 1;
                    progress.images_captured += images.len();
                }
                Err(err @ AmiError::OutOfBoundsMove { .. }) => {
                    tracing::warn!(%label, error = %err, "sample skipped");
                    self.report(&format!("{} skipped: {}", label, err));
                    progress.samples_skipped += 1;
                }
                Err(err) => return Err(err),
            }

            if self.run.is_cancel_requested() {
                progress.cancelled = true;
                self.set_state(ControllerState::Cancelling);
                tracing::info!(%label, "plate run cancelled");
                break;
            }
        }
        Ok(())
    }

    /// Move to one sample and capture its focus stack into `raw_dir`.
    async fn image_sample(
        &mut self,
        at: Cursor,
        raw_dir: &Path,
        label: &str,
    ) -> AmiResult<Vec<String>> {
        let focus = self.resolve_checked(at)?;
        let heights = self.stack_heights(focus)?;
        self.navigate(at).await?;
        let settle = self.options.slice_settle;
        self.capture_series(&heights, raw_dir, label, "rawimages/", settle)
            .await
    }

    /// Release everything the run acquired. Every step is attempted.
    async fn finish_run(&mut self, progress: &mut RunProgress) -> AmiResult<()> {
        let mut first_error: Option<AmiError> = None;
        let mut keep = |result: AmiResult<()>| {
            if let Err(err) = result {
                tracing::error!(error = %err, "run cleanup step failed");
                first_error.get_or_insert(err);
            }
        };

        if let Some(script) = progress.script.take() {
            keep(script.close().await.map(|_| ()).map_err(AmiError::from));
        }
        keep(self.set_preview(false).await);
        keep(self.set_light1(false).await);
        keep(self.set_light2(false).await);
        if progress.hard_limits_disabled {
            let restored = self.hw.motion.hard_limits(true).await.map_err(AmiError::from);
            if restored.is_ok() {
                tracing::info!("hard limits enabled");
            }
            keep(restored);
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Run the plate on a dedicated task.
///
/// The controller stays locked for the whole run, so no other operation can
/// move the cursor meanwhile. Take a [`RunHandle`](super::RunHandle) before
/// spawning to be able to cancel.
pub fn spawn_plate_run(
    controller: Arc<Mutex<DeviceController>>,
) -> JoinHandle<AmiResult<RunSummary>> {
    tokio::spawn(async move {
        let mut controller = controller.lock().await;
        controller.run_plate().await
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn full_run_visits_every_sample() {
        let (mut controller, rig) = rig(plate());
        let summary = controller.run_plate().await.unwrap();

        assert_eq!(summary.samples_completed, 12);
        assert_eq!(summary.images_captured, 36);
        assert!(!summary.cancelled);
        assert!(summary.run_dir.join("plate.toml").exists());
        assert!(summary.run_dir.join("rawimages/B3b_2.jpg").exists());
        assert!(summary.script.ends_with("processplate.com"));
        assert_eq!(rig.camera.captures(), 36);
        assert_eq!(rig.log.count("$21=0"), 1);
        assert_eq!(rig.log.count("$21=1"), 1);
        assert_eq!(controller.state(), ControllerState::Idle);
        assert!(!controller.run_handle().is_running());
    }

    #[tokio::test]
    async fn preview_is_opened_then_closed() {
        let (mut controller, rig) = rig(plate());
        controller.run_plate().await.unwrap();
        let log = rig.log.entries();
        assert_eq!(log.iter().filter(|e| *e == "preview on").count(), 1);
        assert_eq!(log.iter().filter(|e| *e == "preview off").count(), 1);
        let on = log.iter().position(|e| e == "preview on").unwrap();
        let first_capture = log.iter().position(|e| e.starts_with("capture")).unwrap();
        assert!(on < first_capture);
        assert!(!controller.is_viewing());
    }

    #[tokio::test]
    async fn samples_outside_travel_are_skipped() {
        let mut plate = plate();
        plate.corner_br.y = 130.0;
        let (mut controller, rig) = rig(plate);
        let summary = controller.run_plate().await.unwrap();
        // B3a and B3b resolve beyond y_max
        assert_eq!(summary.samples_skipped, 2);
        assert_eq!(summary.samples_completed, 10);
        assert!(rig
            .status
            .messages()
            .iter()
            .any(|m| m.starts_with("B3a skipped")));
    }

    #[tokio::test]
    async fn fault_mid_run_still_cleans_up() {
        let (mut controller, rig) = rig(plate());
        // A1, then A1a and its three slices, then the move to A1b fails
        rig.motion.fail_move(6);
        let err = controller.run_plate().await.unwrap_err();
        assert!(err.leaves_position_unknown());

        assert_eq!(rig.log.count("$21=1"), 1);
        assert_eq!(rig.log.count("light1 off"), 1);
        assert_eq!(rig.log.count("light2 off"), 1);
        assert_eq!(rig.log.count("preview off"), 1);
        assert_eq!(controller.state(), ControllerState::Idle);
        assert!(!controller.run_handle().is_running());
    }

    #[tokio::test]
    async fn cancel_stops_after_the_current_sample() {
        let (mut controller, rig) = rig(plate());
        let handle = controller.run_handle();
        // Mid-way through the second sample's stack
        rig.camera.on_capture(move |n| {
            if n == 5 {
                handle.request_cancel();
            }
        });
        let summary = controller.run_plate().await.unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.samples_completed, 2);
        assert_eq!(rig.camera.captures(), 6);
        let script = std::fs::read_to_string(&summary.script).unwrap();
        assert_eq!(script.matches("echo 'processing:").count(), 2);
        assert!(script.ends_with("rm OUT*.tif \n"));
        assert_eq!(rig.log.count("$21=1"), 1);
        assert_eq!(controller.state(), ControllerState::Idle);
        assert!(!controller.run_handle().is_cancel_requested());
        assert_eq!(rig.status.last().unwrap(), "run stopped after 2 samples");
    }

    #[tokio::test]
    async fn spawned_run_can_be_cancelled_from_outside() {
        let (controller, rig) = rig(plate());
        let handle = controller.run_handle();
        let states = controller.subscribe();
        let controller = Arc::new(Mutex::new(controller));

        let cancel = handle.clone();
        rig.camera.on_capture(move |n| {
            if n == 1 {
                cancel.request_cancel();
            }
        });
        let summary = spawn_plate_run(controller.clone()).await.unwrap().unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.samples_completed, 1);
        assert!(!handle.is_running());
        assert_eq!(*states.borrow(), ControllerState::Idle);
        assert_eq!(controller.lock().await.state(), ControllerState::Idle);
        assert_eq!(rig.log.count("light1 off"), 1);
    }

    #[tokio::test]
    async fn uncalibrated_plate_does_not_start() {
        let (mut controller, rig) = rig(ami_core::PlateConfig::new(3, 2, 1));
        let err = controller.run_plate().await.unwrap_err();
        assert!(matches!(err, AmiError::Configuration(_)));
        assert!(rig.log.entries().is_empty());
        assert!(!controller.run_handle().is_running());
    }
}
