//! Snapshots and focus stacks.

use ami_core::{sample_label, AmiResult, MachinePosition};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;

use super::{ControllerState, DeviceController};
use crate::layout::{timestamp_now, ImageLayout};
use crate::script::StackScript;

/// Files written by a focus-stack snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackCapture {
    /// Slices, lowest z first
    pub images: Vec<PathBuf>,
    /// Stack-merge script for the slices
    pub script: PathBuf,
}

impl DeviceController {
    /// Label of the sample under the cursor, e.g. `B4` or `B4a`.
    pub fn current_label(&self) -> String {
        let c = self.cursor;
        sample_label(&self.plate, c.row, c.col, c.sample)
    }

    /// Capture one image at the current position into `snaps/`.
    pub async fn snap(&mut self) -> AmiResult<PathBuf> {
        self.enter(ControllerState::CapturingSingle);
        let result = self.snap_single().await;
        self.settle_state();
        let path = self.reported(result)?;
        self.report(&format!("image saved to {}", path.display()));
        Ok(path)
    }

    async fn snap_single(&mut self) -> AmiResult<PathBuf> {
        let dir = ImageLayout::new(&self.options.images_root, &self.plate)
            .snaps_dir()
            .await?;
        let path = dir.join(format!("{}_{}.jpg", self.current_label(), timestamp_now()));
        self.hw.camera.capture(&path).await?;
        tracing::info!(path = %path.display(), "snapshot saved");
        Ok(path)
    }

    /// Capture a focus stack at the current position into `snaps/` and write
    /// `<label>_process_snap.com` to merge it.
    ///
    /// The gantry returns to the starting focus height afterwards.
    pub async fn snap_stack(&mut self) -> AmiResult<StackCapture> {
        self.enter(ControllerState::CapturingStack);
        let result = self.snap_focus_stack().await;
        self.settle_state();
        let capture = self.reported(result)?;
        let dir = capture
            .script
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let script = capture
            .script
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.report(&format!(
            "individual images: {}\nsource {} to combine z-stack",
            dir, script
        ));
        Ok(capture)
    }

    async fn snap_focus_stack(&mut self) -> AmiResult<StackCapture> {
        let dir = ImageLayout::new(&self.options.images_root, &self.plate)
            .snaps_dir()
            .await?;
        let label = self.current_label();
        let focus = self.position;
        let z_focus = focus.z;
        let heights = self.stack_heights(focus)?;
        let name = format!("{}_{}", label, timestamp_now());

        let mut script = StackScript::create(dir.join(format!("{}_process_snap.com", label))).await?;
        let captured = self
            .capture_series(&heights, &dir, &name, "", Duration::ZERO)
            .await;
        let written = match &captured {
            Ok(names) => script.append_series(&label, names, &name).await,
            Err(_) => Ok(()),
        };
        let closed = script.close().await;
        let restored = match &captured {
            Err(err) if err.leaves_position_unknown() => Ok(()),
            _ => self.move_z(z_focus).await,
        };

        let names = captured?;
        written?;
        let script = closed?;
        restored?;
        Ok(StackCapture {
            images: names.iter().map(|n| dir.join(n)).collect(),
            script,
        })
    }

    /// Heights of a focus stack around `focus`, lowest first.
    ///
    /// `z_top = z_focus - (1 - frac_below) * (n - 1) * z_step`, then one
    /// `z_step` per slice. Every slice must lie within the travel box.
    pub(crate) fn stack_heights(&self, focus: MachinePosition) -> AmiResult<Vec<f64>> {
        let z_focus = focus.z;
        let n = self.plate.n_focus_images;
        let step = self.plate.z_step;
        let z_top = z_focus - (1.0 - self.options.frac_below) * (n.saturating_sub(1)) as f64 * step;
        let heights: Vec<f64> = (0..n).map(|i| z_top + i as f64 * step).collect();
        for z in &heights {
            self.options.limits.check_target(focus.with_z(*z))?;
        }
        Ok(heights)
    }

    /// Move through `heights`, capturing `<stem>_<i>.jpg` into `dir` at each.
    ///
    /// Returns the file names prefixed with `prefix`, as a script beside `dir`
    /// refers to them.
    pub(crate) async fn capture_series(
        &mut self,
        heights: &[f64],
        dir: &Path,
        stem: &str,
        prefix: &str,
        settle: Duration,
    ) -> AmiResult<Vec<String>> {
        let mut names = Vec::with_capacity(heights.len());
        for (i, z) in heights.iter().enumerate() {
            self.move_z(*z).await?;
            sleep(settle + self.options.camera_delay).await;
            let file = format!("{}_{}.jpg", stem, i);
            self.hw.camera.capture(&dir.join(&file)).await?;
            tracing::debug!(file = %file, z, "slice captured");
            names.push(format!("{}{}", prefix, file));
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use ami_core::AmiError;

    #[tokio::test]
    async fn snap_names_file_after_label() {
        let (mut controller, rig) = rig(plate());
        controller.goto(0, 1, 1).await.unwrap();
        let path = controller.snap().await.unwrap();

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("A2b_"), "{name}");
        assert!(name.ends_with(".jpg"));
        assert!(path.starts_with(rig.images.path().join("AMi_sample/plate/snaps")));
        assert_eq!(rig.camera.captures(), 1);
        assert_eq!(controller.state(), ControllerState::Idle);
    }

    #[tokio::test]
    async fn stack_sweeps_around_focus_and_returns() {
        let (mut controller, rig) = rig(plate());
        controller.goto(0, 0, 0).await.unwrap();
        rig.log.clear();

        let capture = controller.snap_stack().await.unwrap();
        // 3 slices, 0.5 apart, half below focus: 4.5, 5.0, 5.5
        let moves: Vec<String> = rig
            .log
            .entries()
            .into_iter()
            .filter(|e| e.starts_with("G0"))
            .collect();
        assert_eq!(moves, ["G0 Z4.500", "G0 Z5.000", "G0 Z5.500", "G0 Z5.000"]);
        assert_eq!(capture.images.len(), 3);
        assert!(capture.images.iter().all(|p| p.exists()));
        assert_eq!(controller.position().z, 5.0);

        let script = std::fs::read_to_string(&capture.script).unwrap();
        assert!(capture.script.ends_with("A1a_process_snap.com"));
        assert!(script.starts_with("rm OUT*.tif \necho 'processing: A1a' \n"));
        assert!(script.contains("align_image_stack -m -a OUT A1a_"));
        assert!(script.contains("_2.jpg  \n"));
    }

    #[tokio::test]
    async fn stack_below_travel_is_refused_before_moving() {
        let (mut controller, rig) = rig(plate());
        let err = controller.snap_stack().await.unwrap_err();
        assert!(matches!(err, AmiError::OutOfBoundsMove { .. }));
        assert!(rig.log.entries().is_empty());
    }

    #[tokio::test]
    async fn camera_failure_still_closes_script_and_restores_focus() {
        let (mut controller, rig) = rig(plate());
        controller.goto(1, 1, 0).await.unwrap();
        rig.camera.fail_captures();
        let err = controller.snap_stack().await.unwrap_err();
        assert!(matches!(err, AmiError::Hardware(_)));
        assert_eq!(controller.position().z, 5.0);
        assert!(rig.status.last().unwrap().contains("camera unavailable"));
    }
}
