//! Application settings using Figment
//!
//! Settings are loaded from:
//! 1. `config/ami.toml` (or a path given on the command line)
//! 2. Environment variables prefixed with `AMI_`, nested keys split on `__`
//!    (e.g. `AMI_SERIAL__PORT=/dev/ttyACM0`, `AMI_MOTION__IDLE_TIMEOUT_MS=60000`)
//!
//! Every section has defaults matching the stock imager, so an empty file is a
//! valid configuration.
//!
//! # Example
//! ```no_run
//! use ami::config::Settings;
//!
//! let settings = Settings::load()?;
//! settings.validate()?;
//! println!("GRBL on {}", settings.serial.port);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use ami_core::{AmiError, AmiResult, TravelLimits};
use ami_driver_grbl::{GrblTimeouts, DEFAULT_SIMULATED_STATUS};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::logging::LoggingSettings;

/// Default location of the settings file.
pub const DEFAULT_SETTINGS_PATH: &str = "config/ami.toml";

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Motion controller link
    pub serial: SerialSettings,
    /// GPIO lines for light 1 and the idle interlock
    pub gpio: GpioSettings,
    /// How light 2 is driven
    pub light2: Light2Settings,
    /// Camera commands and timing
    pub camera: CameraSettings,
    /// Travel limits and the idle interlock
    pub motion: MotionSettings,
    /// Where images and scripts are written
    pub imaging: ImagingSettings,
    /// Log output
    pub logging: LoggingSettings,
}

/// Serial link to the GRBL controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Serial device path
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Response timeout for ordinary commands (ms)
    pub command_timeout_ms: u64,
    /// Response timeout for the homing cycle (ms)
    pub homing_timeout_ms: u64,
    /// Pause after waking the controller (ms)
    pub wake_delay_ms: u64,
    /// Answer every command with `simulated_status` instead of reading the port
    pub simulated: bool,
    /// Canned status report used when `simulated` is set
    pub simulated_status: String,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            command_timeout_ms: 5_000,
            homing_timeout_ms: 90_000,
            wake_delay_ms: 2_000,
            simulated: false,
            simulated_status: DEFAULT_SIMULATED_STATUS.to_string(),
        }
    }
}

/// Sysfs GPIO lines (BCM numbering)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioSettings {
    /// Root of the sysfs GPIO tree
    pub sysfs_root: PathBuf,
    /// Output driving light 1
    pub light1_pin: u32,
    /// Input pulled low by the motion hardware when a move has finished
    pub idle_input_pin: u32,
    /// Use in-memory lines instead of sysfs
    pub simulated: bool,
}

impl Default for GpioSettings {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys/class/gpio"),
            light1_pin: 17,
            idle_input_pin: 27,
            simulated: false,
        }
    }
}

/// Light 2 is either wired to the controller's spindle output or to a GPIO line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "lowercase")]
pub enum Light2Settings {
    /// `M3` on, `M5` off
    Spindle,
    /// A sysfs GPIO output
    Gpio {
        /// BCM pin number
        pin: u32,
    },
}

impl Default for Light2Settings {
    fn default() -> Self {
        Light2Settings::Spindle
    }
}

/// External camera commands.
///
/// Arguments may contain `{path}`, `{width}` and `{height}` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Still capture command
    pub capture_command: Vec<String>,
    /// Long-running preview command; killed to stop the preview
    pub preview_command: Vec<String>,
    /// Capture width in pixels
    pub width: u32,
    /// Capture height in pixels
    pub height: u32,
    /// Pause before each capture so vibration dies down (ms)
    pub camera_delay_ms: u64,
    /// Pause after switching the preview on before a run (ms)
    pub preview_settle_ms: u64,
    /// Pause after the idle signal before capturing a run slice (ms)
    pub slice_settle_ms: u64,
    /// Write placeholder files instead of running the camera
    pub simulated: bool,
}

impl Default for CameraSettings {
    fn default() -> Self {
        let args = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            capture_command: args(&[
                "rpicam-still",
                "--nopreview",
                "--immediate",
                "--width",
                "{width}",
                "--height",
                "{height}",
                "-o",
                "{path}",
            ]),
            preview_command: args(&["rpicam-hello", "--timeout", "0"]),
            width: 1640,
            height: 1232,
            camera_delay_ms: 500,
            preview_settle_ms: 2_000,
            slice_settle_ms: 200,
            simulated: false,
        }
    }
}

/// Travel limits and the idle interlock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionSettings {
    /// Machine travel box (mm)
    pub limits: TravelLimits,
    /// Interval between polls of the idle input (ms)
    pub idle_poll_interval_ms: u64,
    /// Give up waiting for the idle input after this long (ms)
    pub idle_timeout_ms: u64,
    /// Switch hard limits off for the duration of a plate run
    pub disable_hard_limits: bool,
    /// Fraction of a focus stack taken below the focus plane (0..=1)
    pub frac_below: f64,
    /// Wake and home the controller when connecting
    pub initialize_on_connect: bool,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            limits: TravelLimits::default(),
            idle_poll_interval_ms: 50,
            idle_timeout_ms: 120_000,
            disable_hard_limits: true,
            frac_below: 0.5,
            initialize_on_connect: true,
        }
    }
}

/// Output locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagingSettings {
    /// Root of the image tree (`<root>/<sample_id>/<plate_id>/...`)
    pub images_root: PathBuf,
    /// Plate file used when none is given on the command line
    pub plate_file: PathBuf,
}

impl Default for ImagingSettings {
    fn default() -> Self {
        Self {
            images_root: PathBuf::from("images"),
            plate_file: PathBuf::from("plate.toml"),
        }
    }
}

impl Settings {
    /// Load settings from `config/ami.toml` and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_SETTINGS_PATH)
    }

    /// Load settings from a specific file plus the environment.
    ///
    /// A missing file is not an error; defaults and the environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    /// The provider stack used by [`Settings::load_from`].
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("AMI_").split("__"))
    }

    /// Semantic checks that serde cannot express.
    pub fn validate(&self) -> AmiResult<()> {
        let fail = |msg: String| Err(AmiError::Configuration(msg));

        if self.serial.command_timeout_ms == 0 || self.serial.homing_timeout_ms == 0 {
            return fail("serial timeouts must be positive".to_string());
        }
        if self.motion.idle_poll_interval_ms == 0 || self.motion.idle_timeout_ms == 0 {
            return fail("idle poll interval and idle timeout must be positive".to_string());
        }
        if self.motion.idle_poll_interval_ms > self.motion.idle_timeout_ms {
            return fail(format!(
                "idle poll interval {} ms exceeds idle timeout {} ms",
                self.motion.idle_poll_interval_ms, self.motion.idle_timeout_ms
            ));
        }
        if !(0.0..=1.0).contains(&self.motion.frac_below) {
            return fail(format!(
                "frac_below must be within [0, 1], got {}",
                self.motion.frac_below
            ));
        }
        let limits = &self.motion.limits;
        if [limits.x_max, limits.y_max, limits.z_max]
            .iter()
            .any(|v| !(v.is_finite() && *v > 0.0))
        {
            return fail(format!("travel limits must be positive, got {}", limits));
        }

        let gpio = &self.gpio;
        if gpio.light1_pin == gpio.idle_input_pin {
            return fail(format!(
                "light 1 and the idle input share GPIO {}",
                gpio.light1_pin
            ));
        }
        if let Light2Settings::Gpio { pin } = self.light2 {
            if pin == gpio.light1_pin || pin == gpio.idle_input_pin {
                return fail(format!("light 2 GPIO {} is already in use", pin));
            }
        }

        if !self.camera.simulated && self.camera.capture_command.is_empty() {
            return fail("camera capture_command is empty".to_string());
        }
        if !self.camera.simulated && self.camera.preview_command.is_empty() {
            return fail("camera preview_command is empty".to_string());
        }

        Ok(())
    }

    /// Response timeouts for the GRBL client.
    pub fn grbl_timeouts(&self) -> GrblTimeouts {
        GrblTimeouts {
            command: Duration::from_millis(self.serial.command_timeout_ms),
            homing: Duration::from_millis(self.serial.homing_timeout_ms),
            wake_delay: Duration::from_millis(self.serial.wake_delay_ms),
        }
    }
}
