//! Device controller.
//!
//! [`DeviceController`] owns the plate configuration, every device, and all
//! mutable imager state: the logical cursor, the cached machine position,
//! preview and light flags, and the pending calibration target. Operations
//! take `&mut self`, so there is exactly one writer at a time; a plate run on a
//! background task holds the controller behind a mutex for its whole
//! duration.
//!
//! Operations are grouped by concern:
//!
//! - [`navigation`]: moves to samples, stepping, jogging, homing
//! - [`calibration`]: corner and sub-sample selection and commit
//! - [`imaging`]: single snapshots and focus stacks
//! - [`run`]: the full-plate batch with cooperative cancellation
//! - [`idle`]: the movement-complete interlock
//!
//! Every rejected operation or fault is reported to the [`StatusSink`] as well
//! as returned to the caller.

pub mod calibration;
mod idle;
pub mod imaging;
pub mod navigation;
pub mod run;
pub mod state;

use ami_core::{AmiError, AmiResult, MachinePosition, PlateConfig, TravelLimits};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::Settings;
use crate::hardware::Hardware;
use crate::status::StatusSink;

pub use calibration::CalibrationTarget;
pub use run::{spawn_plate_run, RunSummary};
pub use state::{ControllerState, RunHandle};

/// Timing, limits and output settings used by the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerOptions {
    /// Machine travel box
    pub limits: TravelLimits,
    /// Interval between reads of the idle input
    pub idle_poll_interval: Duration,
    /// Longest wait for the idle input
    pub idle_timeout: Duration,
    /// Switch hard limits off during plate runs
    pub disable_hard_limits: bool,
    /// Fraction of a focus stack below the focus plane
    pub frac_below: f64,
    /// Pause before each capture
    pub camera_delay: Duration,
    /// Pause after switching the preview on before a run
    pub preview_settle: Duration,
    /// Pause after the idle signal before each run slice
    pub slice_settle: Duration,
    /// Root of the image tree
    pub images_root: PathBuf,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for ControllerOptions {
    fn from(settings: &Settings) -> Self {
        let ms = Duration::from_millis;
        Self {
            limits: settings.motion.limits,
            idle_poll_interval: ms(settings.motion.idle_poll_interval_ms),
            idle_timeout: ms(settings.motion.idle_timeout_ms),
            disable_hard_limits: settings.motion.disable_hard_limits,
            frac_below: settings.motion.frac_below,
            camera_delay: ms(settings.camera.camera_delay_ms),
            preview_settle: ms(settings.camera.preview_settle_ms),
            slice_settle: ms(settings.camera.slice_settle_ms),
            images_root: settings.imaging.images_root.clone(),
        }
    }
}

/// Logical position on the plate, 0-based.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    /// Row, from the top-left corner toward the bottom-left corner
    pub row: usize,
    /// Column, from the top-left corner toward the top-right corner
    pub col: usize,
    /// Sub-sample within the well
    pub sample: usize,
}

/// The imager: plate model, hardware and state machine.
pub struct DeviceController {
    plate: PlateConfig,
    hw: Hardware,
    options: ControllerOptions,
    status: Arc<dyn StatusSink>,
    cursor: Cursor,
    position: MachinePosition,
    viewing: bool,
    light1_on: bool,
    light2_on: bool,
    calibration_target: Option<CalibrationTarget>,
    state: Arc<watch::Sender<ControllerState>>,
    run: RunHandle,
}

impl DeviceController {
    /// Build a controller for a validated plate.
    ///
    /// The cursor starts at A1 and the cached machine position at the homed
    /// origin; no hardware is touched.
    pub fn new(
        plate: PlateConfig,
        hw: Hardware,
        options: ControllerOptions,
        status: Arc<dyn StatusSink>,
    ) -> AmiResult<Self> {
        plate.validate()?;
        if !(0.0..=1.0).contains(&options.frac_below) {
            return Err(AmiError::Configuration(format!(
                "frac_below must be within [0, 1], got {}",
                options.frac_below
            )));
        }
        let (state, _) = watch::channel(ControllerState::Idle);
        let state = Arc::new(state);
        Ok(Self {
            plate,
            hw,
            options,
            status,
            cursor: Cursor::default(),
            position: MachinePosition::default(),
            viewing: false,
            light1_on: false,
            light2_on: false,
            calibration_target: None,
            run: RunHandle::new(state.clone()),
            state,
        })
    }

    /// Plate configuration, including any committed calibration.
    pub fn plate(&self) -> &PlateConfig {
        &self.plate
    }

    /// Options in effect.
    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    /// Logical cursor.
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Last commanded machine position; the GRBL controller is authoritative.
    pub fn position(&self) -> MachinePosition {
        self.position
    }

    /// Whether the live preview is showing.
    pub fn is_viewing(&self) -> bool {
        self.viewing
    }

    /// Whether light 1 is on.
    pub fn light1_on(&self) -> bool {
        self.light1_on
    }

    /// Whether light 2 is on.
    pub fn light2_on(&self) -> bool {
        self.light2_on
    }

    /// Current state.
    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    /// Watch state changes without holding the controller.
    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.state.subscribe()
    }

    /// Handle for cancelling a plate run from another task.
    pub fn run_handle(&self) -> RunHandle {
        self.run.clone()
    }

    /// The devices.
    pub fn hardware(&self) -> &Hardware {
        &self.hw
    }

    /// Read back the machine position from the controller and cache it.
    pub async fn sync_position(&mut self) -> AmiResult<MachinePosition> {
        let position = self.hw.motion.get_machine_position().await;
        let position = self.reported(position.map_err(AmiError::from))?;
        self.position = position;
        Ok(position)
    }

    // ---------------------------------------------------------------------
    // Lights and preview
    // ---------------------------------------------------------------------

    /// Switch light 1.
    pub async fn set_light1(&mut self, on: bool) -> AmiResult<()> {
        let result = self.hw.light1.set(on).await.map_err(AmiError::Hardware);
        self.reported(result)?;
        self.light1_on = on;
        tracing::debug!(on, "light 1");
        Ok(())
    }

    /// Switch light 2.
    pub async fn set_light2(&mut self, on: bool) -> AmiResult<()> {
        let result = self.hw.light2.set(on).await.map_err(AmiError::Hardware);
        self.reported(result)?;
        self.light2_on = on;
        tracing::debug!(on, "light 2");
        Ok(())
    }

    /// Flip light 1.
    pub async fn toggle_light1(&mut self) -> AmiResult<()> {
        self.set_light1(!self.light1_on).await
    }

    /// Flip light 2.
    pub async fn toggle_light2(&mut self) -> AmiResult<()> {
        self.set_light2(!self.light2_on).await
    }

    /// Open or close the live view. Ignored while a plate run is active.
    pub async fn toggle_preview(&mut self) -> AmiResult<()> {
        if self.run.is_running() {
            self.report("the live view cannot be changed while the plate is running");
            return Ok(());
        }
        self.set_preview(!self.viewing).await
    }

    pub(crate) async fn set_preview(&mut self, on: bool) -> AmiResult<()> {
        let result = if on {
            self.hw.preview.start_preview().await
        } else {
            self.hw.preview.stop_preview().await
        };
        self.reported(result.map_err(AmiError::Hardware))?;
        self.viewing = on;
        Ok(())
    }

    /// Preview off, both lights off, serial link closed.
    ///
    /// Every step is attempted; the first failure is returned.
    pub async fn shutdown(mut self) -> AmiResult<()> {
        let preview = self.set_preview(false).await;
        let light1 = self.set_light1(false).await;
        let light2 = self.set_light2(false).await;
        let close = self.hw.close().await;
        tracing::info!("imager shut down");
        preview.and(light1).and(light2).and(close)
    }

    // ---------------------------------------------------------------------
    // State and status helpers
    // ---------------------------------------------------------------------

    pub(crate) fn set_state(&self, state: ControllerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::trace!(from = %previous, to = %state, "controller state");
        }
    }

    /// Enter an operation state unless a plate run owns the state.
    pub(crate) fn enter(&self, state: ControllerState) {
        if !self.run.is_running() {
            self.set_state(state);
        }
    }

    /// State to rest in after an operation: the run state during a plate run,
    /// `Calibrating` while a target is pending, otherwise `Idle`.
    pub(crate) fn settle_state(&self) {
        let state = if self.run.is_running() {
            if self.run.is_cancel_requested() {
                ControllerState::Cancelling
            } else {
                ControllerState::RunningBatch
            }
        } else if self.calibration_target.is_some() {
            ControllerState::Calibrating
        } else {
            ControllerState::Idle
        };
        self.set_state(state);
    }

    pub(crate) fn report(&self, message: &str) {
        self.status.report(message);
    }

    /// Report a failed result to the status sink and pass it through.
    pub(crate) fn reported<T>(&self, result: AmiResult<T>) -> AmiResult<T> {
        if let Err(err) = &result {
            tracing::warn!(error = %err, "operation failed");
            if err.leaves_position_unknown() {
                self.report(&format!("{}; home the machine before continuing", err));
            } else {
                self.report(&err.to_string());
            }
        }
        result
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::hardware::mock::{
        CallLog, MockCamera, MockInput, MockMotion, MockOutput, RecordingStatusSink,
    };
    use ami_core::MachinePosition;

    /// Controller over mocks sharing one call log.
    pub struct Rig {
        pub log: CallLog,
        pub motion: Arc<MockMotion>,
        pub idle: Arc<MockInput>,
        pub camera: Arc<MockCamera>,
        pub status: RecordingStatusSink,
        pub images: tempfile::TempDir,
    }

    pub fn plate() -> PlateConfig {
        let mut plate = PlateConfig::new(3, 2, 2).with_corners(
            MachinePosition::new(10.0, 10.0, 5.0),
            MachinePosition::new(30.0, 10.0, 5.0),
            MachinePosition::new(10.0, 20.0, 5.0),
            MachinePosition::new(30.0, 20.0, 5.0),
        );
        plate.subsample_offsets[1] = ami_core::SubsampleOffset { dx: 0.1, dy: 0.0 };
        plate.n_focus_images = 3;
        plate.z_step = 0.5;
        plate
    }

    pub fn rig(plate: PlateConfig) -> (DeviceController, Rig) {
        try_rig(plate).unwrap()
    }

    pub fn try_rig(plate: PlateConfig) -> AmiResult<(DeviceController, Rig)> {
        let log = CallLog::new();
        let motion = Arc::new(MockMotion::new(log.clone()));
        let idle = Arc::new(MockInput::idle());
        let camera = Arc::new(MockCamera::new(log.clone()));
        let status = RecordingStatusSink::new();
        let images = tempfile::tempdir().unwrap();
        let hw = Hardware::new(
            motion.clone(),
            Arc::new(MockOutput::new("light1", log.clone())),
            Arc::new(MockOutput::new("light2", log.clone())),
            idle.clone(),
            camera.clone(),
            camera.clone(),
        );
        let options = ControllerOptions {
            idle_poll_interval: Duration::from_millis(1),
            idle_timeout: Duration::from_millis(200),
            camera_delay: Duration::ZERO,
            preview_settle: Duration::ZERO,
            slice_settle: Duration::ZERO,
            images_root: images.path().to_path_buf(),
            ..ControllerOptions::default()
        };
        let controller = DeviceController::new(plate, hw, options, Arc::new(status.clone()))?;
        Ok((
            controller,
            Rig {
                log,
                motion,
                idle,
                camera,
                status,
                images,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn lights_mirror_their_lines() {
        let (mut controller, rig) = rig(plate());
        controller.toggle_light1().await.unwrap();
        controller.toggle_light2().await.unwrap();
        controller.toggle_light2().await.unwrap();
        assert!(controller.light1_on());
        assert!(!controller.light2_on());
        assert_eq!(rig.log.entries(), ["light1 on", "light2 on", "light2 off"]);
    }

    #[tokio::test]
    async fn preview_is_locked_during_a_run() {
        let (mut controller, rig) = rig(plate());
        controller.run.begin();
        controller.toggle_preview().await.unwrap();
        assert!(!controller.is_viewing());
        assert!(rig.status.last().unwrap().contains("live view"));
        controller.run.finish();

        controller.toggle_preview().await.unwrap();
        assert!(controller.is_viewing());
        assert!(rig.camera.is_previewing());
    }

    #[tokio::test]
    async fn shutdown_turns_everything_off() {
        let (mut controller, rig) = rig(plate());
        controller.set_light1(true).await.unwrap();
        controller.toggle_preview().await.unwrap();
        rig.log.clear();

        controller.shutdown().await.unwrap();
        assert_eq!(rig.log.entries(), ["preview off", "light1 off", "light2 off"]);
    }

    #[test]
    fn invalid_plate_is_refused() {
        let result = try_rig(PlateConfig::new(1, 8, 1));
        assert!(matches!(result, Err(AmiError::Configuration(_))));
    }
}
