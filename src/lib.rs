//! # AMi plate imager
//!
//! Motion and imaging control for an automated microscope that images every
//! well of a crystallisation plate. A GRBL controller drives the x/y/z gantry
//! over a serial line, two lights and a "movement complete" input hang off
//! GPIO lines, and a camera captures focus stacks that are later merged with
//! `align_image_stack` and `enfuse`.
//!
//! ## Crate Structure
//!
//! - **`config`**: figment-loaded [`config::Settings`] (file plus `AMI_` environment).
//! - **`logging`**: tracing subscriber set-up from the `[logging]` section.
//! - **`hardware`**: capability traits, sysfs GPIO, the camera and in-memory mocks.
//! - **`controller`**: [`DeviceController`], which owns the plate model and the
//!   hardware and implements navigation, calibration, snapshots and plate runs.
//! - **`layout`**: directory layout and timestamps of the image tree.
//! - **`script`**: the shell scripts that merge focus stacks.
//! - **`status`**: operator-facing status lines.
//!
//! Plate geometry, labels and errors live in `ami-core`; the GRBL line
//! protocol lives in `ami-driver-grbl`.

pub mod config;
pub mod controller;
pub mod hardware;
pub mod layout;
pub mod logging;
pub mod script;
pub mod status;

pub use ami_core::{
    AmiError, AmiResult, Corner, MachinePosition, PlateConfig, SubsampleOffset, TravelLimits,
};
pub use controller::{
    spawn_plate_run, ControllerOptions, ControllerState, Cursor, DeviceController, RunHandle,
    RunSummary,
};
pub use status::{StatusSink, TracingStatusSink};
