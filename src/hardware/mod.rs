//! Imager hardware.
//!
//! - [`capabilities`]: the traits the controller drives
//! - [`gpio`]: sysfs GPIO lines for light 1, light 2 and the idle input
//! - [`camera`]: camera driven through external capture/preview commands
//! - [`spindle_light`]: light 2 on the controller's spindle output
//! - [`mock`]: in-memory implementations for tests and bench work
//!
//! [`Hardware`] bundles one of each device; [`Hardware::from_settings`] picks
//! real or simulated implementations per section.

pub mod camera;
pub mod capabilities;
pub mod gpio;
pub mod mock;
pub mod spindle_light;

use ami_core::AmiResult;
use ami_driver_grbl::{GrblClient, MotionProtocol};
use std::sync::Arc;

use crate::config::{Light2Settings, Settings};
pub use capabilities::{CaptureSink, DigitalInput, DigitalOutput, Previewable};

/// Every device the controller owns.
pub struct Hardware {
    /// GRBL motion controller
    pub motion: Arc<dyn MotionProtocol>,
    /// Light 1
    pub light1: Arc<dyn DigitalOutput>,
    /// Light 2
    pub light2: Arc<dyn DigitalOutput>,
    /// Movement-complete input; low once the gantry has stopped
    pub idle_input: Arc<dyn DigitalInput>,
    /// Live camera view
    pub preview: Arc<dyn Previewable>,
    /// Still capture
    pub camera: Arc<dyn CaptureSink>,
    grbl: Option<Arc<GrblClient>>,
}

impl Hardware {
    /// Bundle already constructed devices.
    pub fn new(
        motion: Arc<dyn MotionProtocol>,
        light1: Arc<dyn DigitalOutput>,
        light2: Arc<dyn DigitalOutput>,
        idle_input: Arc<dyn DigitalInput>,
        preview: Arc<dyn Previewable>,
        camera: Arc<dyn CaptureSink>,
    ) -> Self {
        Self {
            motion,
            light1,
            light2,
            idle_input,
            preview,
            camera,
            grbl: None,
        }
    }

    /// Open and initialise every device described by `settings`.
    ///
    /// The GRBL controller is woken and homed when
    /// `motion.initialize_on_connect` is set.
    pub async fn from_settings(settings: &Settings) -> AmiResult<Self> {
        let timeouts = settings.grbl_timeouts();
        let grbl = if settings.serial.simulated {
            Arc::new(GrblClient::simulated(
                settings.serial.simulated_status.clone(),
                timeouts,
            ))
        } else {
            Arc::new(
                GrblClient::connect(&settings.serial.port, settings.serial.baud_rate, timeouts)
                    .await?,
            )
        };
        if settings.motion.initialize_on_connect {
            grbl.initialize().await?;
        }
        let motion: Arc<dyn MotionProtocol> = grbl.clone();

        let gpio = &settings.gpio;
        let log = mock::CallLog::new();
        let (light1, idle_input): (Arc<dyn DigitalOutput>, Arc<dyn DigitalInput>) =
            if gpio.simulated {
                (
                    Arc::new(mock::MockOutput::new("light1", log.clone())),
                    Arc::new(mock::MockInput::idle()),
                )
            } else {
                (
                    Arc::new(gpio::SysfsPin::output(&gpio.sysfs_root, gpio.light1_pin).await?),
                    Arc::new(gpio::SysfsPin::input(&gpio.sysfs_root, gpio.idle_input_pin).await?),
                )
            };

        let light2: Arc<dyn DigitalOutput> = match settings.light2 {
            Light2Settings::Spindle => {
                Arc::new(spindle_light::SpindleLight::new(motion.clone()))
            }
            Light2Settings::Gpio { .. } if gpio.simulated => {
                Arc::new(mock::MockOutput::new("light2", log.clone()))
            }
            Light2Settings::Gpio { pin } => {
                Arc::new(gpio::SysfsPin::output(&gpio.sysfs_root, pin).await?)
            }
        };

        let (preview, camera): (Arc<dyn Previewable>, Arc<dyn CaptureSink>) =
            if settings.camera.simulated {
                let camera = Arc::new(mock::MockCamera::new(log));
                (camera.clone(), camera)
            } else {
                let camera = Arc::new(camera::CommandCamera::new(&settings.camera));
                (camera.clone(), camera)
            };

        tracing::info!(
            serial = %settings.serial.port,
            simulated_serial = settings.serial.simulated,
            simulated_gpio = gpio.simulated,
            simulated_camera = settings.camera.simulated,
            "hardware ready"
        );

        Ok(Self {
            motion,
            light1,
            light2,
            idle_input,
            preview,
            camera,
            grbl: Some(grbl),
        })
    }

    /// Close the serial link, if this bundle opened one.
    pub async fn close(&self) -> AmiResult<()> {
        if let Some(grbl) = &self.grbl {
            grbl.close().await?;
        }
        Ok(())
    }
}
