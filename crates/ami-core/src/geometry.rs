//! Plate coordinate model.
//!
//! Logical sample addresses `(row, col, sample)` map to machine positions by
//! bilinear interpolation over the unit square spanned by the four calibrated
//! corners. Row index grows from the top-left corner toward the bottom-left
//! corner, column index from the top-left corner toward the top-right corner.
//!
//! Everything here is a pure function of the plate configuration.

use crate::error::{AmiError, AmiResult};
use crate::plate::{Corner, MachinePosition, PlateConfig, SubsampleOffset};

impl PlateConfig {
    /// Machine position of sample `sample` in the well at `(row, col)`.
    ///
    /// ```text
    /// x = col/(nx-1) + offset[sample].dx
    /// y = row/(ny-1) + offset[sample].dy
    /// pos = br*x*y + bl*(1-x)*y + tr*x*(1-y) + tl*(1-x)*(1-y)
    /// ```
    pub fn resolve(&self, row: usize, col: usize, sample: usize) -> AmiResult<MachinePosition> {
        self.check_address(row, col, sample)?;
        let offset = self
            .subsample_offsets
            .get(sample)
            .copied()
            .ok_or_else(|| {
                AmiError::Configuration(format!(
                    "no stored offset for sub-sample {} ({} stored)",
                    sample,
                    self.subsample_offsets.len()
                ))
            })?;

        let x = col as f64 / (self.nx - 1) as f64 + offset.dx;
        let y = row as f64 / (self.ny - 1) as f64 + offset.dy;
        Ok(self.interpolate(x, y))
    }

    /// Reject indices outside the plate without clamping.
    pub fn check_address(&self, row: usize, col: usize, sample: usize) -> AmiResult<()> {
        if self.nx < 2 || self.ny < 2 {
            return Err(AmiError::Configuration(format!(
                "plate must have at least 2 rows and 2 columns, got {}x{}",
                self.ny, self.nx
            )));
        }
        if row >= self.ny {
            return Err(AmiError::OutOfRange {
                what: "row",
                value: row,
                limit: self.ny,
            });
        }
        if col >= self.nx {
            return Err(AmiError::OutOfRange {
                what: "column",
                value: col,
                limit: self.nx,
            });
        }
        if sample >= self.samples_per_well {
            return Err(AmiError::OutOfRange {
                what: "sub-sample",
                value: sample,
                limit: self.samples_per_well,
            });
        }
        Ok(())
    }

    /// Bilinear blend of the corners at normalized plate coordinates `(x, y)`.
    fn interpolate(&self, x: f64, y: f64) -> MachinePosition {
        let (tl, tr, bl, br) = (self.corner_tl, self.corner_tr, self.corner_bl, self.corner_br);
        let axis = |tl: f64, tr: f64, bl: f64, br: f64| {
            br * x * y + bl * (1.0 - x) * y + tr * x * (1.0 - y) + tl * (1.0 - x) * (1.0 - y)
        };
        MachinePosition {
            x: axis(tl.x, tr.x, bl.x, br.x),
            y: axis(tl.y, tr.y, bl.y, br.y),
            z: axis(tl.z, tr.z, bl.z, br.z),
        }
    }

    /// Fail with a configuration error when the corners cannot span a plate.
    ///
    /// Sub-sample calibration divides by the top edge width in x and the left
    /// edge height in y, so both must be non-zero.
    pub fn check_corners(&self) -> AmiResult<()> {
        if self.corner_tr.x == self.corner_tl.x {
            return Err(AmiError::Configuration(format!(
                "corners TL and TR share x = {:.3}; calibrate the top corners first",
                self.corner_tl.x
            )));
        }
        if self.corner_bl.y == self.corner_tl.y {
            return Err(AmiError::Configuration(format!(
                "corners TL and BL share y = {:.3}; calibrate the left corners first",
                self.corner_tl.y
            )));
        }
        Ok(())
    }

    /// Sub-sample offset that places sub-sample positions at `measured` when
    /// taken relative to the top-left well.
    pub fn subsample_offset_at(&self, measured: MachinePosition) -> AmiResult<SubsampleOffset> {
        self.check_corners()?;
        Ok(SubsampleOffset {
            dx: (measured.x - self.corner_tl.x) / (self.corner_tr.x - self.corner_tl.x),
            dy: (measured.y - self.corner_tl.y) / (self.corner_bl.y - self.corner_tl.y),
        })
    }

    /// Machine position of a corner as resolved through the grid.
    pub fn resolve_corner(&self, corner: Corner) -> AmiResult<MachinePosition> {
        let (row, col) = corner.cell(self);
        self.resolve(row, col, 0)
    }

    /// Every `(row, col, sample)` on the plate in run order: rows outermost,
    /// then columns, then sub-samples.
    pub fn sample_order(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        (0..self.ny).flat_map(move |row| {
            (0..self.nx).flat_map(move |col| {
                (0..self.samples_per_well).map(move |sample| (row, col, sample))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> PlateConfig {
        PlateConfig::new(2, 2, 1).with_corners(
            MachinePosition::new(0.0, 0.0, 0.0),
            MachinePosition::new(10.0, 0.0, 0.0),
            MachinePosition::new(0.0, 10.0, 0.0),
            MachinePosition::new(10.0, 10.0, 0.0),
        )
    }

    #[test]
    fn two_by_two_plate() {
        let plate = square();
        assert_eq!(plate.resolve(0, 0, 0).unwrap(), MachinePosition::new(0.0, 0.0, 0.0));
        assert_eq!(plate.resolve(1, 1, 0).unwrap(), MachinePosition::new(10.0, 10.0, 0.0));
        assert_eq!(plate.resolve(0, 1, 0).unwrap(), MachinePosition::new(10.0, 0.0, 0.0));
        assert_eq!(plate.resolve(1, 0, 0).unwrap(), MachinePosition::new(0.0, 10.0, 0.0));
    }

    #[test]
    fn out_of_range_is_not_clamped() {
        let plate = square();
        assert!(matches!(
            plate.resolve(2, 0, 0),
            Err(AmiError::OutOfRange { what: "row", .. })
        ));
        assert!(matches!(
            plate.resolve(0, 2, 0),
            Err(AmiError::OutOfRange { what: "column", .. })
        ));
        assert!(matches!(
            plate.resolve(0, 0, 1),
            Err(AmiError::OutOfRange { what: "sub-sample", .. })
        ));
    }

    #[test]
    fn subsample_offset_shifts_position() {
        let mut plate = PlateConfig::new(3, 3, 2).with_corners(
            MachinePosition::new(100.0, 20.0, 5.0),
            MachinePosition::new(20.0, 20.0, 5.0),
            MachinePosition::new(100.0, 80.0, 5.0),
            MachinePosition::new(20.0, 80.0, 5.0),
        );
        let measured = MachinePosition::new(96.0, 23.0, 5.0);
        let offset = plate.subsample_offset_at(measured).unwrap();
        assert!((offset.dx - 0.05).abs() < 1e-12);
        assert!((offset.dy - 0.05).abs() < 1e-12);
        plate.subsample_offsets[1] = offset;

        let pos = plate.resolve(0, 0, 1).unwrap();
        assert!((pos.x - 96.0).abs() < 1e-9);
        assert!((pos.y - 23.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_corners_are_configuration_errors() {
        let plate = PlateConfig::new(2, 2, 1);
        assert!(matches!(
            plate.check_corners(),
            Err(AmiError::Configuration(_))
        ));
        assert!(plate
            .subsample_offset_at(MachinePosition::new(1.0, 1.0, 0.0))
            .is_err());
        assert!(square().check_corners().is_ok());
    }

    #[test]
    fn run_order_is_row_column_sample() {
        let plate = PlateConfig::new(2, 2, 2);
        let order: Vec<_> = plate.sample_order().collect();
        assert_eq!(order.len(), 8);
        assert_eq!(order[0], (0, 0, 0));
        assert_eq!(order[1], (0, 0, 1));
        assert_eq!(order[2], (0, 1, 0));
        assert_eq!(order[4], (1, 0, 0));
        assert_eq!(order[7], (1, 1, 1));
    }
}
