//! Travel limits and shared timing constants.
//!
//! Centralizes:
//! - The machine travel box used to reject out-of-bounds moves
//! - Default timeouts and poll intervals for the motion controller

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{AmiError, AmiResult};
use crate::plate::MachinePosition;

// =============================================================================
// Timeout Constants
// =============================================================================

/// Default time to wait for a single response line (5 seconds).
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time to wait for the homing cycle to answer (90 seconds).
///
/// `$H` only acknowledges after every axis has found its switch.
pub const HOMING_TIMEOUT: Duration = Duration::from_secs(90);

/// Delay after the wake-up line before the start-up banner is drained.
pub const WAKE_DELAY: Duration = Duration::from_secs(2);

/// Interval between polls of the movement-complete input.
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound on a single idle wait (2 minutes).
///
/// A full-travel rapid on the gantry takes well under a minute.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

// =============================================================================
// Travel Limits
// =============================================================================

/// Machine travel box in millimeters. The lower bound is the homed origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TravelLimits {
    pub x_max: f64,
    pub y_max: f64,
    pub z_max: f64,
}

impl Default for TravelLimits {
    fn default() -> Self {
        Self {
            x_max: 160.0,
            y_max: 118.0,
            z_max: 29.0,
        }
    }
}

impl fmt::Display for TravelLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[0, {:.3}] x [0, {:.3}] x [0, {:.3}]",
            self.x_max, self.y_max, self.z_max
        )
    }
}

impl TravelLimits {
    /// Accept a computed (interpolated) target lying inside the closed box.
    pub fn check_target(&self, target: MachinePosition) -> AmiResult<()> {
        let inside = (0.0..=self.x_max).contains(&target.x)
            && (0.0..=self.y_max).contains(&target.y)
            && (0.0..=self.z_max).contains(&target.z);
        if inside {
            Ok(())
        } else {
            Err(self.out_of_bounds(target))
        }
    }

    /// Accept a manual jog from `from` to `to` when every axis that moves stays
    /// strictly inside the box.
    ///
    /// Jogs stop short of the limit switches so a hard-limit alarm is never
    /// triggered by hand. Axes that do not move are not checked.
    pub fn check_jog(&self, from: MachinePosition, to: MachinePosition) -> AmiResult<()> {
        let open = |old: f64, new: f64, max: f64| old == new || (new > 0.0 && new < max);
        if open(from.x, to.x, self.x_max)
            && open(from.y, to.y, self.y_max)
            && open(from.z, to.z, self.z_max)
        {
            Ok(())
        } else {
            Err(self.out_of_bounds(to))
        }
    }

    fn out_of_bounds(&self, target: MachinePosition) -> AmiError {
        AmiError::OutOfBoundsMove {
            target,
            limits: *self,
        }
    }
}
