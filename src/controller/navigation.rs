//! Moving around the plate.

use ami_core::{row_col_from_label, sample_label, AmiError, AmiResult, MachinePosition};

use super::{ControllerState, Cursor, DeviceController};

impl DeviceController {
    /// Move to sample `sample` of the well at `(row, col)`.
    ///
    /// The target is resolved through the plate calibration and checked
    /// against the travel box before anything is sent. On any failure the
    /// cursor keeps its previous value.
    pub async fn goto(&mut self, row: usize, col: usize, sample: usize) -> AmiResult<MachinePosition> {
        self.calibration_target = None;
        let result = self.navigate(Cursor { row, col, sample }).await;
        self.reported(result)
    }

    /// Move to an operator-typed address such as `B4`, `b4c` or `17`.
    ///
    /// Without a sub-sample letter the first sub-sample is used.
    pub async fn goto_label(&mut self, text: &str) -> AmiResult<MachinePosition> {
        let address = self.reported(row_col_from_label(&self.plate, text))?;
        self.goto(address.row, address.col, address.sample_or_first())
            .await
    }

    /// Step to the next sample: sub-sample, then column, then row.
    pub async fn next_sample(&mut self) -> AmiResult<Cursor> {
        self.calibration_target = None;
        let Cursor { row, col, sample } = self.cursor;
        let plate = &self.plate;
        let next = if sample + 1 < plate.samples_per_well {
            Cursor { row, col, sample: sample + 1 }
        } else if col + 1 < plate.nx {
            Cursor { row, col: col + 1, sample: 0 }
        } else if row + 1 < plate.ny {
            Cursor { row: row + 1, col: 0, sample: 0 }
        } else {
            self.settle_state();
            self.report("cannot advance beyond the last sample");
            return Ok(self.cursor);
        };
        self.step_to(next).await
    }

    /// Step to the previous sample: sub-sample, then column, then row.
    pub async fn prev_sample(&mut self) -> AmiResult<Cursor> {
        self.calibration_target = None;
        let Cursor { row, col, sample } = self.cursor;
        let last_sample = self.plate.samples_per_well - 1;
        let prev = if sample > 0 {
            Cursor { row, col, sample: sample - 1 }
        } else if col > 0 {
            Cursor { row, col: col - 1, sample: last_sample }
        } else if row > 0 {
            Cursor { row: row - 1, col: self.plate.nx - 1, sample: last_sample }
        } else {
            self.settle_state();
            self.report("cannot reverse beyond the first sample");
            return Ok(self.cursor);
        };
        self.step_to(prev).await
    }

    /// Next row, same column and sub-sample; wraps to the first row.
    pub async fn next_row(&mut self) -> AmiResult<Cursor> {
        self.calibration_target = None;
        let row = (self.cursor.row + 1) % self.plate.ny;
        self.step_to(Cursor { row, ..self.cursor }).await
    }

    /// Previous row, same column and sub-sample; wraps to the last row.
    pub async fn prev_row(&mut self) -> AmiResult<Cursor> {
        self.calibration_target = None;
        let row = self
            .cursor
            .row
            .checked_sub(1)
            .unwrap_or(self.plate.ny - 1);
        self.step_to(Cursor { row, ..self.cursor }).await
    }

    async fn step_to(&mut self, cursor: Cursor) -> AmiResult<Cursor> {
        let result = self.navigate(cursor).await;
        self.reported(result)?;
        Ok(self.cursor)
    }

    /// Resolve, bound-check, move and wait. Leaves the state settled.
    pub(crate) async fn navigate(&mut self, to: Cursor) -> AmiResult<MachinePosition> {
        let target = self.resolve_checked(to)?;
        self.enter(ControllerState::Navigating);
        let moved = self.move_to(target).await;
        self.settle_state();
        moved?;
        self.cursor = to;
        tracing::debug!(
            label = %sample_label(&self.plate, to.row, to.col, to.sample),
            position = %target,
            "at sample"
        );
        Ok(target)
    }

    /// Machine position of `at`, refusing degenerate calibration and targets
    /// outside the travel box.
    pub(crate) fn resolve_checked(&self, at: Cursor) -> AmiResult<MachinePosition> {
        self.plate.check_corners()?;
        let target = self.plate.resolve(at.row, at.col, at.sample)?;
        self.options.limits.check_target(target)?;
        Ok(target)
    }

    /// Relative manual move from the cached position.
    ///
    /// Every axis that moves must stay strictly inside the travel box;
    /// otherwise nothing is sent and the cached position is kept. Jogs do not
    /// wait for the idle interlock.
    pub async fn jog(&mut self, dx: f64, dy: f64, dz: f64) -> AmiResult<MachinePosition> {
        let from = self.position;
        let to = MachinePosition::new(from.x + dx, from.y + dy, from.z + dz);
        self.reported(self.options.limits.check_jog(from, to))?;

        let axis = |delta: f64, value: f64| (delta != 0.0).then_some(value);
        let result = self
            .hw
            .motion
            .rapid_move(axis(dx, to.x), axis(dy, to.y), axis(dz, to.z))
            .await
            .map_err(AmiError::from);
        self.reported(result)?;
        self.position = to;

        if self.calibration_target.is_some() {
            self.report(&format!("current X,Y,Z: {:.3}, {:.3}, {:.3}", to.x, to.y, to.z));
        }
        Ok(to)
    }

    /// Clear any alarm and run the homing cycle.
    ///
    /// The cached position returns to the machine origin and the calibration
    /// target is dropped.
    pub async fn home(&mut self) -> AmiResult<()> {
        self.calibration_target = None;
        self.enter(ControllerState::Navigating);
        self.report("wait while machine resets...");
        let result: AmiResult<()> = async {
            self.hw.motion.kill_alarm_lock().await?;
            self.hw.motion.run_homing_cycle().await?;
            Ok(())
        }
        .await;
        self.settle_state();
        self.reported(result)?;
        self.position = MachinePosition::default();
        self.report("Ready to rumble!");
        Ok(())
    }

    /// Send `$X` to clear an alarm lock without homing.
    pub async fn unlock(&mut self) -> AmiResult<()> {
        self.calibration_target = None;
        let result = self
            .hw
            .motion
            .kill_alarm_lock()
            .await
            .map_err(AmiError::from);
        self.reported(result)?;
        self.report("$X sent to GRBL");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn goto_resolves_and_waits() {
        let (mut controller, rig) = rig(plate());
        let position = controller.goto(1, 2, 0).await.unwrap();
        assert_eq!(position, MachinePosition::new(30.0, 20.0, 5.0));
        assert_eq!(controller.cursor(), Cursor { row: 1, col: 2, sample: 0 });
        assert_eq!(
            rig.log.entries(),
            ["G0 X30.000 Y20.000 Z5.000", "M9", "M8"]
        );
        assert_eq!(controller.state(), ControllerState::Idle);
    }

    #[tokio::test]
    async fn goto_label_reports_bad_address_and_keeps_cursor() {
        let (mut controller, rig) = rig(plate());
        controller.goto_label("B2b").await.unwrap();
        assert_eq!(controller.cursor(), Cursor { row: 1, col: 1, sample: 1 });

        let err = controller.goto_label("Q9").await.unwrap_err();
        assert!(matches!(err, AmiError::InvalidAddress { .. }));
        assert!(rig.status.last().unwrap().contains("Q9"));
        assert_eq!(controller.cursor(), Cursor { row: 1, col: 1, sample: 1 });
    }

    #[tokio::test]
    async fn stepping_walks_the_plate_and_stops_at_the_ends() {
        let (mut controller, rig) = rig(plate());
        assert_eq!(controller.prev_sample().await.unwrap(), Cursor::default());
        assert_eq!(
            rig.status.last().unwrap(),
            "cannot reverse beyond the first sample"
        );

        let mut visited = vec![controller.cursor()];
        for _ in 0..controller.plate().total_samples() - 1 {
            visited.push(controller.next_sample().await.unwrap());
        }
        let expected: Vec<Cursor> = controller
            .plate()
            .sample_order()
            .map(|(row, col, sample)| Cursor { row, col, sample })
            .collect();
        assert_eq!(visited, expected);

        controller.next_sample().await.unwrap();
        assert_eq!(
            rig.status.last().unwrap(),
            "cannot advance beyond the last sample"
        );
        assert_eq!(controller.prev_sample().await.unwrap(), Cursor { row: 1, col: 2, sample: 0 });
        assert_eq!(controller.prev_sample().await.unwrap(), Cursor { row: 1, col: 1, sample: 1 });
    }

    #[tokio::test]
    async fn rows_wrap_around() {
        let (mut controller, _rig) = rig(plate());
        controller.goto(0, 1, 1).await.unwrap();
        assert_eq!(controller.prev_row().await.unwrap(), Cursor { row: 1, col: 1, sample: 1 });
        assert_eq!(controller.next_row().await.unwrap(), Cursor { row: 0, col: 1, sample: 1 });
    }

    #[tokio::test]
    async fn target_outside_travel_is_never_sent() {
        let mut plate = plate();
        plate.corner_br.x = 500.0;
        let (mut controller, rig) = rig(plate);
        let err = controller.goto(1, 2, 0).await.unwrap_err();
        assert!(matches!(err, AmiError::OutOfBoundsMove { .. }));
        assert!(rig.log.entries().is_empty());
        assert_eq!(controller.cursor(), Cursor::default());
    }

    #[tokio::test]
    async fn jog_checks_only_moving_axes() {
        let (mut controller, rig) = rig(plate());
        let to = controller.jog(5.0, 0.0, 0.0).await.unwrap();
        assert_eq!(to, MachinePosition::new(5.0, 0.0, 0.0));

        let err = controller.jog(-5.0, 0.0, 0.0).await.unwrap_err();
        assert!(matches!(err, AmiError::OutOfBoundsMove { .. }));
        assert!(rig
            .status
            .last()
            .unwrap()
            .starts_with("that move would take you out of bounds"));
        assert_eq!(controller.position(), MachinePosition::new(5.0, 0.0, 0.0));
        assert_eq!(rig.log.entries(), ["G0 X5.000"]);
    }

    #[tokio::test]
    async fn failed_move_is_reported_as_needing_home() {
        let (mut controller, rig) = rig(plate());
        rig.motion.fail_move(1);
        let err = controller.goto(0, 1, 0).await.unwrap_err();
        assert!(err.leaves_position_unknown());
        assert!(rig.status.last().unwrap().contains("home the machine"));
        assert_eq!(controller.cursor(), Cursor::default());

        controller.home().await.unwrap();
        assert_eq!(rig.log.count("$H"), 1);
        assert_eq!(rig.status.last().unwrap(), "Ready to rumble!");
    }
}
