//! Corner and sub-sample calibration.
//!
//! Calibration is a two-step exchange with the operator: select a point (the
//! gantry moves to where the plate model currently puts it), jog until the
//! camera is centred on it, then commit. Commit reads the cached machine
//! position, writes it into the plate configuration and clears the selection.

use ami_core::labels::subsample_letter;
use ami_core::{AmiError, AmiResult, Corner};
use std::fmt;
use std::path::Path;

use super::{ControllerState, Cursor, DeviceController};

/// Which plate parameter the next commit overwrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationTarget {
    /// One of the four corners
    Corner(Corner),
    /// Offset of sub-sample `n` (never 0, which is the well position itself)
    Subsample(usize),
}

impl fmt::Display for CalibrationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationTarget::Corner(corner) => write!(f, "{}", corner),
            CalibrationTarget::Subsample(n) => write!(f, "sub-sample {}", subsample_letter(*n)),
        }
    }
}

impl DeviceController {
    /// Pending calibration point, if any.
    pub fn calibration_target(&self) -> Option<CalibrationTarget> {
        self.calibration_target
    }

    /// Select `corner` for calibration and move to its well.
    ///
    /// While the corners are still degenerate there is nowhere to move to, so
    /// only the selection is made and the operator jogs there by hand.
    pub async fn select_corner(&mut self, corner: Corner) -> AmiResult<()> {
        self.calibration_target = Some(CalibrationTarget::Corner(corner));
        self.enter(ControllerState::Calibrating);

        let (row, col) = corner.cell(&self.plate);
        if self.plate.check_corners().is_ok() {
            let result = self.navigate(Cursor { row, col, sample: 0 }).await;
            self.reported(result)?;
        } else {
            self.cursor = Cursor { row, col, sample: 0 };
            tracing::debug!(%corner, "corners not calibrated yet; not moving");
        }

        if corner == Corner::TopLeft && self.plate.samples_per_well > 1 {
            self.report(
                "SET now changes TL coordinates. After the corners select sub-samples from TL",
            );
        } else {
            self.report(&format!("SET now changes {} coordinates.", corner.tag()));
        }
        Ok(())
    }

    /// Select the next sub-sample of the first well for calibration.
    ///
    /// Cycles through sub-samples `1..samples_per_well`; sub-sample 0 is the
    /// well position and is calibrated through the corners.
    pub async fn select_next_subsample(&mut self) -> AmiResult<()> {
        let samples = self.plate.samples_per_well;
        if samples < 2 {
            self.report("no sub-samples specified.");
            return Ok(());
        }
        let next = match self.calibration_target {
            Some(CalibrationTarget::Subsample(n)) if n + 1 < samples => n + 1,
            _ if self.cursor.sample > 0 && self.cursor.sample + 1 < samples => {
                self.cursor.sample + 1
            }
            _ => 1,
        };
        self.calibration_target = Some(CalibrationTarget::Subsample(next));
        self.enter(ControllerState::Calibrating);

        let result = self
            .navigate(Cursor {
                row: 0,
                col: 0,
                sample: next,
            })
            .await;
        self.reported(result)?;
        self.report(&format!(
            "SET now changes sub-sample {} coordinates.",
            subsample_letter(next)
        ));
        Ok(())
    }

    /// Write the cached machine position into the selected calibration point.
    ///
    /// With nothing selected this changes nothing and reports
    /// "You must first select a corner".
    pub async fn commit_calibration(&mut self) -> AmiResult<()> {
        let Some(target) = self.calibration_target else {
            self.report("You must first select a corner");
            return Ok(());
        };
        let measured = self.position;

        let message = match target {
            CalibrationTarget::Corner(corner) => {
                *self.plate.corner_mut(corner) = measured;
                format!("{} coordinates saved", corner.tag())
            }
            CalibrationTarget::Subsample(n) => {
                let saved = self.plate.subsample_offset_at(measured).and_then(|offset| {
                    let limit = self.plate.samples_per_well;
                    let slot = self.plate.subsample_offsets.get_mut(n).ok_or(
                        AmiError::OutOfRange {
                            what: "sub-sample",
                            value: n,
                            limit,
                        },
                    )?;
                    *slot = offset;
                    Ok(())
                });
                if let Err(err) = saved {
                    self.calibration_target = None;
                    self.settle_state();
                    return self.reported(Err(err));
                }
                format!("{} coordinates saved", subsample_letter(n))
            }
        };

        tracing::info!(%target, position = %measured, "calibration committed");
        self.calibration_target = None;
        self.settle_state();
        self.report(&message);
        Ok(())
    }

    /// Persist the plate configuration, including committed calibration.
    pub fn save_plate(&self, path: impl AsRef<Path>) -> AmiResult<()> {
        let result = self.plate.save(path.as_ref());
        self.reported(result)?;
        tracing::info!(path = %path.as_ref().display(), "plate configuration saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use ami_core::{MachinePosition, PlateConfig, SubsampleOffset};

    #[tokio::test]
    async fn commit_without_selection_changes_nothing() {
        let (mut controller, rig) = rig(plate());
        let before = controller.plate().clone();
        controller.jog(3.0, 3.0, 0.0).await.unwrap();

        controller.commit_calibration().await.unwrap();
        controller.commit_calibration().await.unwrap();
        assert_eq!(controller.plate(), &before);
        let messages = rig.status.messages();
        assert_eq!(
            messages[messages.len() - 2..],
            ["You must first select a corner", "You must first select a corner"]
        );
    }

    #[tokio::test]
    async fn corner_commit_stores_jogged_position() {
        let (mut controller, rig) = rig(plate());
        controller.select_corner(Corner::TopRight).await.unwrap();
        assert_eq!(controller.cursor(), Cursor { row: 0, col: 2, sample: 0 });
        assert_eq!(controller.state(), ControllerState::Calibrating);
        assert_eq!(rig.status.last().unwrap(), "SET now changes TR coordinates.");

        controller.jog(0.5, -0.25, 0.0).await.unwrap();
        controller.commit_calibration().await.unwrap();

        assert_eq!(
            controller.plate().corner_tr,
            MachinePosition::new(30.5, 9.75, 5.0)
        );
        assert_eq!(rig.status.last().unwrap(), "TR coordinates saved");
        assert_eq!(controller.calibration_target(), None);
        assert_eq!(controller.state(), ControllerState::Idle);
    }

    #[tokio::test]
    async fn subsample_commit_stores_fractional_offset() {
        let (mut controller, rig) = rig(plate());
        controller.select_next_subsample().await.unwrap();
        assert_eq!(
            controller.calibration_target(),
            Some(CalibrationTarget::Subsample(1))
        );
        controller.jog(1.0, 2.0, 0.0).await.unwrap();
        controller.commit_calibration().await.unwrap();

        let offset = controller.plate().subsample_offsets[1];
        // Resolved at 10 + 0.1*20 = 12, jogged to 13: (13-10)/20, (12-10)/10
        assert!((offset.dx - 0.15).abs() < 1e-12);
        assert!((offset.dy - 0.2).abs() < 1e-12);
        assert_eq!(rig.status.last().unwrap(), "b coordinates saved");
    }

    #[tokio::test]
    async fn subsample_selection_cycles_and_skips_zero() {
        let mut plate = plate();
        plate.samples_per_well = 3;
        plate.subsample_offsets = vec![SubsampleOffset::default(); 3];
        let (mut controller, _rig) = rig(plate);
        let mut seen = Vec::new();
        for _ in 0..3 {
            controller.select_next_subsample().await.unwrap();
            seen.push(controller.calibration_target());
        }
        assert_eq!(
            seen,
            [1, 2, 1].map(|n| Some(CalibrationTarget::Subsample(n)))
        );
    }

    #[tokio::test]
    async fn corners_can_be_selected_before_any_calibration() {
        let (mut controller, rig) = rig(PlateConfig::new(12, 8, 1));
        controller.select_corner(Corner::BottomRight).await.unwrap();
        assert_eq!(controller.cursor(), Cursor { row: 7, col: 11, sample: 0 });
        assert!(rig.log.entries().is_empty());

        controller.jog(100.0, 80.0, 10.0).await.unwrap();
        controller.commit_calibration().await.unwrap();
        assert_eq!(
            controller.plate().corner_br,
            MachinePosition::new(100.0, 80.0, 10.0)
        );
    }

    #[tokio::test]
    async fn navigation_drops_the_selection() {
        let (mut controller, rig) = rig(plate());
        controller.select_corner(Corner::BottomLeft).await.unwrap();
        controller.next_sample().await.unwrap();
        controller.commit_calibration().await.unwrap();
        assert_eq!(rig.status.last().unwrap(), "You must first select a corner");
    }
}
