//! Shared rig for the controller integration tests.
#![allow(dead_code)]

use ami::hardware::mock::{
    CallLog, MockCamera, MockInput, MockMotion, MockOutput, RecordingStatusSink,
};
use ami::hardware::Hardware;
use ami::{ControllerOptions, DeviceController, MachinePosition, PlateConfig, SubsampleOffset};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct Bench {
    pub log: CallLog,
    pub motion: Arc<MockMotion>,
    pub idle: Arc<MockInput>,
    pub camera: Arc<MockCamera>,
    pub status: RecordingStatusSink,
    pub images: TempDir,
}

/// 4 x 3 plate, two drops per well, three-slice stacks.
pub fn small_plate() -> PlateConfig {
    let mut plate = PlateConfig::new(4, 3, 2).with_corners(
        MachinePosition::new(20.0, 20.0, 8.0),
        MachinePosition::new(50.0, 20.0, 8.0),
        MachinePosition::new(20.0, 40.0, 8.0),
        MachinePosition::new(50.0, 40.0, 8.0),
    );
    plate.subsample_offsets[1] = SubsampleOffset { dx: 0.05, dy: 0.0 };
    plate.n_focus_images = 3;
    plate.z_step = 0.25;
    plate.plate_id = "xs2".to_string();
    plate
}

pub fn bench(plate: PlateConfig) -> (DeviceController, Bench) {
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
        idle_timeout: Duration::from_millis(250),
        camera_delay: Duration::ZERO,
        preview_settle: Duration::ZERO,
        slice_settle: Duration::ZERO,
        images_root: images.path().to_path_buf(),
        ..ControllerOptions::default()
    };
    let controller =
        DeviceController::new(plate, hw, options, Arc::new(status.clone())).unwrap();
    (
        controller,
        Bench {
            log,
            motion,
            idle,
            camera,
            status,
            images,
        },
    )
}
