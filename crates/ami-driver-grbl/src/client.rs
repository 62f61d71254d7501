//! GRBL serial client.
//!
//! Reference: <https://github.com/gnea/grbl/wiki/Grbl-v1.1-Interface>
//!
//! Protocol overview:
//! - Format: ASCII command/response lines over USB serial
//! - Baud: 115200, 8N1, no flow control
//! - Every command line is answered before the next one is sent
//!
//! # Usage
//!
//! ```rust,ignore
//! use ami_driver_grbl::{GrblClient, GrblTimeouts, MotionProtocol};
//!
//! let grbl = GrblClient::connect("/dev/ttyUSB0", 115200, GrblTimeouts::default()).await?;
//! grbl.initialize().await?;
//! grbl.rapid_move(Some(10.0), Some(20.0), None).await?;
//! ```

use ami_core::limits::{COMMAND_TIMEOUT, HOMING_TIMEOUT, WAKE_DELAY};
use ami_core::serial::{drain_serial_buffer, wrap_shared, SharedPort};
use ami_core::{AmiResult, MachinePosition, ProtocolError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

use crate::motion::MotionProtocol;
use crate::protocol::{Command, ProtocolResult, Reply, StatusReport};
use crate::waiter::{ResponseWaiter, SerialResponseWaiter, SimulatedResponseWaiter};

/// Line written to wake the controller.
const WAKE_LINE: &str = "\r\n\r\n";

/// How long to keep discarding the start-up banner after the wake delay.
const BANNER_DRAIN_WINDOW: Duration = Duration::from_millis(100);

/// Maximum spindle speed; the spindle output powers light 2 at full brightness.
pub const MAX_SPINDLE_SPEED: u32 = 1000;

/// Timing parameters for the client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrblTimeouts {
    /// Time allowed for an ordinary response unit.
    pub command: Duration,
    /// Time allowed for the homing cycle to acknowledge.
    pub homing: Duration,
    /// Pause after the wake-up line before draining the banner.
    pub wake_delay: Duration,
}

impl Default for GrblTimeouts {
    fn default() -> Self {
        Self {
            command: COMMAND_TIMEOUT,
            homing: HOMING_TIMEOUT,
            wake_delay: WAKE_DELAY,
        }
    }
}

/// Client for a GRBL motion controller.
///
/// The port lock is held from the first byte written until the response unit
/// has been consumed, so concurrent callers are strictly serialized.
pub struct GrblClient {
    port: SharedPort,
    waiter: Arc<dyn ResponseWaiter>,
    timeouts: GrblTimeouts,
}

impl GrblClient {
    /// Open the serial port and build a client that reads real responses.
    ///
    /// The controller is not woken or homed; call [`GrblClient::initialize`].
    #[instrument(skip(timeouts), err)]
    pub async fn connect(port_path: &str, baud_rate: u32, timeouts: GrblTimeouts) -> AmiResult<Self> {
        let port = ami_core::serial::open_serial_async(port_path, baud_rate).await?;
        Ok(Self::with_port(
            wrap_shared(port),
            Arc::new(SerialResponseWaiter),
            timeouts,
        ))
    }

    /// Client for a simulated controller that answers every command with `status`.
    ///
    /// Written bytes go to an in-memory pipe whose far end is discarded by a
    /// background task, so this must be called inside a Tokio runtime.
    pub fn simulated(status: impl Into<String>, timeouts: GrblTimeouts) -> Self {
        let (device, mut far_end) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let _ = tokio::io::copy(&mut far_end, &mut tokio::io::sink()).await;
        });
        tracing::info!("using simulated GRBL controller");
        Self::with_port(
            wrap_shared(Box::new(device)),
            Arc::new(SimulatedResponseWaiter::new(status)),
            timeouts,
        )
    }

    /// Client over an already open port with the given response strategy.
    pub fn with_port(
        port: SharedPort,
        waiter: Arc<dyn ResponseWaiter>,
        timeouts: GrblTimeouts,
    ) -> Self {
        Self {
            port,
            waiter,
            timeouts,
        }
    }

    /// Send one command and collect its response unit.
    async fn exchange(&self, command: &Command, timeout: Duration) -> ProtocolResult<Reply> {
        let text = command.to_string();
        let mut port = self.port.lock().await;

        tracing::debug!(command = %text, "grbl ->");
        let writer = port.get_mut();
        writer
            .write_all(command.to_line().as_bytes())
            .await
            .map_err(|source| ProtocolError::Write {
                command: text.clone(),
                source,
            })?;
        writer.flush().await.map_err(|source| ProtocolError::Write {
            command: text.clone(),
            source,
        })?;

        let reply = self
            .waiter
            .wait_for_response(&mut port, &text, timeout)
            .await?;
        reply.into_result(&text)
    }

    async fn send(&self, command: Command) -> ProtocolResult<()> {
        self.exchange(&command, self.timeouts.command).await.map(|_| ())
    }

    /// Query and decode a status report.
    #[instrument(skip(self), err)]
    pub async fn status_report(&self) -> ProtocolResult<StatusReport> {
        let reply = self
            .exchange(&Command::StatusQuery, self.timeouts.command)
            .await?;
        let line = reply
            .status_line()
            .ok_or_else(|| ProtocolError::StatusReport(reply.lines().join("\n")))?;
        StatusReport::parse(line)
    }

    /// Wake, home and prepare the controller for imaging.
    ///
    /// 1. Wake the controller and discard its banner.
    /// 2. Enable hard limits, home, and read the status.
    /// 3. Zero the work coordinates if the controller reports them unset.
    /// 4. Raise the idle-interlock output, unlock, and set full spindle speed.
    #[instrument(skip(self), err)]
    pub async fn initialize(&self) -> ProtocolResult<StatusReport> {
        {
            let mut port = self.port.lock().await;
            let writer = port.get_mut();
            let wake = |source| ProtocolError::Write {
                command: "<wake>".to_string(),
                source,
            };
            writer.write_all(WAKE_LINE.as_bytes()).await.map_err(wake)?;
            writer.flush().await.map_err(wake)?;
            tokio::time::sleep(self.timeouts.wake_delay).await;
            drain_serial_buffer(port.get_mut(), BANNER_DRAIN_WINDOW).await;
        }

        self.hard_limits(true).await?;
        self.exchange(&Command::Home, self.timeouts.homing).await?;
        let report = self.status_report().await?;
        if report.is_unzeroed() {
            tracing::info!(work = %report.work, "zeroing work coordinate system");
            let w = report.work;
            self.set_coordinate_system(1, Some(w.x), Some(w.y), Some(w.z))
                .await?;
        }
        self.coolant_control(false, true).await?;
        self.kill_alarm_lock().await?;
        self.set_spindle_speed(MAX_SPINDLE_SPEED).await?;

        tracing::info!(state = %report.state, machine = %report.machine, "GRBL ready");
        Ok(report)
    }

    /// Shut down the write half of the port.
    pub async fn close(&self) -> std::io::Result<()> {
        let mut port = self.port.lock().await;
        port.get_mut().shutdown().await
    }
}

#[async_trait]
impl MotionProtocol for GrblClient {
    #[instrument(skip(self), err)]
    async fn rapid_move(
        &self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
    ) -> ProtocolResult<()> {
        self.send(Command::RapidMove { x, y, z }).await
    }

    #[instrument(skip(self), err)]
    async fn run_homing_cycle(&self) -> ProtocolResult<()> {
        self.exchange(&Command::Home, self.timeouts.homing)
            .await
            .map(|_| ())
    }

    #[instrument(skip(self), err)]
    async fn kill_alarm_lock(&self) -> ProtocolResult<()> {
        self.send(Command::KillAlarmLock).await
    }

    #[instrument(skip(self), err)]
    async fn hard_limits(&self, enabled: bool) -> ProtocolResult<()> {
        self.send(Command::hard_limits(enabled)).await
    }

    #[instrument(skip(self), err)]
    async fn set_spindle_speed(&self, rpm: u32) -> ProtocolResult<()> {
        self.send(Command::SpindleSpeed(rpm)).await
    }

    #[instrument(skip(self), err)]
    async fn spindle_control(&self, clockwise: bool, running: bool) -> ProtocolResult<()> {
        self.send(Command::Spindle { clockwise, running }).await
    }

    /// Mist and flood share a modal group, so both on takes two lines.
    #[instrument(skip(self), err)]
    async fn coolant_control(&self, mist: bool, flood: bool) -> ProtocolResult<()> {
        match (mist, flood) {
            (false, false) => self.send(Command::CoolantOff).await,
            (true, false) => self.send(Command::CoolantMist).await,
            (false, true) => self.send(Command::CoolantFlood).await,
            (true, true) => {
                self.send(Command::CoolantMist).await?;
                self.send(Command::CoolantFlood).await
            }
        }
    }

    #[instrument(skip(self), err)]
    async fn set_coordinate_system(
        &self,
        system: u8,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
    ) -> ProtocolResult<()> {
        self.send(Command::SetCoordinateSystem { system, x, y, z })
            .await
    }

    async fn get_work_position(&self) -> ProtocolResult<MachinePosition> {
        Ok(self.status_report().await?.work)
    }

    async fn get_machine_position(&self) -> ProtocolResult<MachinePosition> {
        Ok(self.status_report().await?.machine)
    }

    #[instrument(skip(self), err)]
    async fn cycle_start(&self) -> ProtocolResult<()> {
        self.send(Command::CycleStart).await
    }

    #[instrument(skip(self), err)]
    async fn feed_hold(&self) -> ProtocolResult<()> {
        self.send(Command::FeedHold).await
    }
}
