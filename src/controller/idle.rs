//! Movement-complete interlock.
//!
//! GRBL acknowledges a `G0` as soon as it is queued, not when the gantry
//! stops. The motion board instead pulls a GPIO input low once its move has
//! finished, and it only does so after the aux (flood coolant) output has been
//! dropped. Waiting for a move is therefore:
//!
//! 1. `M9`: aux output low, "move issued"
//! 2. poll the idle input until it reads low, sleeping between polls
//! 3. `M8`: aux output high again, always, even when the wait failed

use ami_core::{AmiError, AmiResult, MachinePosition};
use tokio::time::{sleep, Instant};

use super::DeviceController;

impl DeviceController {
    /// Block until the motion hardware reports the current move complete.
    pub(crate) async fn wait_for_idle(&self) -> AmiResult<()> {
        self.hw.motion.coolant_control(false, false).await?;
        let waited = self.poll_idle_input().await;
        let raised = self.hw.motion.coolant_control(false, true).await;
        waited?;
        raised?;
        Ok(())
    }

    async fn poll_idle_input(&self) -> AmiResult<()> {
        let timeout = self.options.idle_timeout;
        let deadline = Instant::now() + timeout;
        let mut polls = 0u32;
        loop {
            polls += 1;
            if !self.hw.idle_input.read().await? {
                tracing::trace!(polls, "motion idle");
                return Ok(());
            }
            if Instant::now() >= deadline {
                tracing::error!(?timeout, polls, "idle input never went low");
                return Err(AmiError::IdleTimeout(timeout));
            }
            sleep(self.options.idle_poll_interval).await;
        }
    }

    /// Rapid to `target` on all three axes and wait for the move to finish.
    ///
    /// The cached position is updated once the controller accepts the move.
    pub(crate) async fn move_to(&mut self, target: MachinePosition) -> AmiResult<()> {
        self.hw
            .motion
            .rapid_move(Some(target.x), Some(target.y), Some(target.z))
            .await?;
        self.position = target;
        self.wait_for_idle().await
    }

    /// Rapid in z only and wait for the move to finish.
    pub(crate) async fn move_z(&mut self, z: f64) -> AmiResult<()> {
        self.hw.motion.rapid_move(None, None, Some(z)).await?;
        self.position.z = z;
        self.wait_for_idle().await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn aux_output_brackets_the_wait() {
        let (controller, rig) = rig(plate());
        rig.idle.busy_for(3);
        controller.wait_for_idle().await.unwrap();
        assert_eq!(rig.log.entries(), ["M9", "M8"]);
        assert_eq!(rig.idle.reads(), 4);
    }

    #[tokio::test]
    async fn stuck_input_times_out_and_raises_aux_again() {
        let (controller, rig) = rig(plate());
        rig.idle.set_level(true);
        let err = controller.wait_for_idle().await.unwrap_err();
        assert!(matches!(err, AmiError::IdleTimeout(_)));
        assert!(err.leaves_position_unknown());
        assert_eq!(rig.log.entries(), ["M9", "M8"]);
    }

    #[tokio::test]
    async fn move_updates_cached_position() {
        let (mut controller, rig) = rig(plate());
        controller
            .move_to(MachinePosition::new(1.0, 2.0, 3.0))
            .await
            .unwrap();
        controller.move_z(4.0).await.unwrap();
        assert_eq!(controller.position(), MachinePosition::new(1.0, 2.0, 4.0));
        assert_eq!(
            rig.log.entries(),
            ["G0 X1.000 Y2.000 Z3.000", "M9", "M8", "G0 Z4.000", "M9", "M8"]
        );
    }
}
