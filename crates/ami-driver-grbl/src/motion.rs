//! Motion controller capability.
//!
//! The device controller drives the gantry only through this trait so that
//! tests can substitute a recording fake for the serial client.

use ami_core::MachinePosition;
use async_trait::async_trait;

use crate::protocol::ProtocolResult;

/// Command/response operations of a GRBL-style motion controller.
///
/// Each call sends one command and returns once its response unit has been
/// consumed. Implementations serialize concurrent callers.
#[async_trait]
pub trait MotionProtocol: Send + Sync {
    /// `G0` rapid move; `None` axes are left where they are.
    async fn rapid_move(&self, x: Option<f64>, y: Option<f64>, z: Option<f64>)
        -> ProtocolResult<()>;

    /// `$H` homing cycle.
    async fn run_homing_cycle(&self) -> ProtocolResult<()>;

    /// `$X` clear an alarm lock.
    async fn kill_alarm_lock(&self) -> ProtocolResult<()>;

    /// `$21=1` / `$21=0`.
    async fn hard_limits(&self, enabled: bool) -> ProtocolResult<()>;

    /// `S<rpm>`.
    async fn set_spindle_speed(&self, rpm: u32) -> ProtocolResult<()>;

    /// `M3` / `M4` / `M5`.
    async fn spindle_control(&self, clockwise: bool, running: bool) -> ProtocolResult<()>;

    /// `M7` / `M8` / `M9`. Both flags false switches all coolant off.
    async fn coolant_control(&self, mist: bool, flood: bool) -> ProtocolResult<()>;

    /// `G10 L2 P<system>` coordinate system offset.
    async fn set_coordinate_system(
        &self,
        system: u8,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
    ) -> ProtocolResult<()>;

    /// Work coordinates from a status query.
    async fn get_work_position(&self) -> ProtocolResult<MachinePosition>;

    /// Machine coordinates from a status query.
    async fn get_machine_position(&self) -> ProtocolResult<MachinePosition>;

    /// `~` resume.
    async fn cycle_start(&self) -> ProtocolResult<()>;

    /// `!` hold.
    async fn feed_hold(&self) -> ProtocolResult<()>;
}
