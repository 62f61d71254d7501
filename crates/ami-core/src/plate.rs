//! Plate configuration: grid size, calibrated corners, sub-sample offsets and
//! imaging parameters.
//!
//! The configuration is read before a controller exists and is then treated as
//! mutable shared state: calibration commits overwrite corners and offsets, while
//! navigation and runs read them.
//!
//! # File format
//!
//! ```toml
//! nx = 12
//! ny = 8
//! samples_per_well = 2
//! z_step = 0.3
//! n_focus_images = 4
//! sample_id = "AMi_sample"
//! plate_id = "AB_xs2"
//!
//! corner_tl = { x = 134.2, y = 29.3, z = 7.5 }
//! corner_tr = { x = 35.2, y = 28.7, z = 7.3 }
//! corner_bl = { x = 133.5, y = 92.9, z = 7.1 }
//! corner_br = { x = 35.0, y = 91.9, z = 7.0 }
//!
//! subsample_offsets = [
//!     { dx = 0.0, dy = 0.0 },
//!     { dx = 0.021, dy = 0.004 },
//! ]
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{AmiError, AmiResult};
use crate::labels::ROW_LETTERS;

/// Physical gantry position in millimeters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MachinePosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl MachinePosition {
    /// Position from its three axis values.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Same position with a different height.
    pub fn with_z(self, z: f64) -> Self {
        Self { z, ..self }
    }
}

impl fmt::Display for MachinePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

/// Fractional offset of a sub-sample from the nominal well position, in units of
/// one plate width (dx) and one plate height (dy).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubsampleOffset {
    pub dx: f64,
    pub dy: f64,
}

/// One of the four calibrated plate corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Corner {
    /// All corners in calibration order.
    pub const ALL: [Corner; 4] = [
        Corner::TopLeft,
        Corner::TopRight,
        Corner::BottomLeft,
        Corner::BottomRight,
    ];

    /// Two-letter tag used in status messages ("TL", "TR", "BL", "BR").
    pub fn tag(self) -> &'static str {
        match self {
            Corner::TopLeft => "TL",
            Corner::TopRight => "TR",
            Corner::BottomLeft => "BL",
            Corner::BottomRight => "BR",
        }
    }

    /// Grid cell `(row, col)` that sits on this corner.
    pub fn cell(self, plate: &PlateConfig) -> (usize, usize) {
        let last_row = plate.ny.saturating_sub(1);
        let last_col = plate.nx.saturating_sub(1);
        match self {
            Corner::TopLeft => (0, 0),
            Corner::TopRight => (0, last_col),
            Corner::BottomLeft => (last_row, 0),
            Corner::BottomRight => (last_row, last_col),
        }
    }
}

impl fmt::Display for Corner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Plate description consumed by geometry, navigation and imaging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateConfig {
    /// Number of well positions along x (columns).
    pub nx: usize,
    /// Number of well positions along y (rows).
    pub ny: usize,
    /// Sample points inside each well.
    pub samples_per_well: usize,
    pub corner_tl: MachinePosition,
    pub corner_tr: MachinePosition,
    pub corner_bl: MachinePosition,
    pub corner_br: MachinePosition,
    /// One offset per sample; the first is `(0, 0)` by convention.
    #[serde(default)]
    pub subsample_offsets: Vec<SubsampleOffset>,
    /// Image spacing in z (mm).
    pub z_step: f64,
    /// Images per focus stack.
    pub n_focus_images: usize,
    /// Sample name (no spaces).
    pub sample_id: String,
    /// Plate name (no spaces).
    pub plate_id: String,
}

impl PlateConfig {
    /// Plate with uncalibrated (all-zero) corners and zero sub-sample offsets.
    pub fn new(nx: usize, ny: usize, samples_per_well: usize) -> Self {
        Self {
            nx,
            ny,
            samples_per_well,
            corner_tl: MachinePosition::default(),
            corner_tr: MachinePosition::default(),
            corner_bl: MachinePosition::default(),
            corner_br: MachinePosition::default(),
            subsample_offsets: vec![SubsampleOffset::default(); samples_per_well],
            z_step: 0.3,
            n_focus_images: 4,
            sample_id: "AMi_sample".to_string(),
            plate_id: "plate".to_string(),
        }
    }

    /// Set all four corners at once.
    pub fn with_corners(
        mut self,
        tl: MachinePosition,
        tr: MachinePosition,
        bl: MachinePosition,
        br: MachinePosition,
    ) -> Self {
        self.corner_tl = tl;
        self.corner_tr = tr;
        self.corner_bl = bl;
        self.corner_br = br;
        self
    }

    /// Read and validate a plate file.
    pub fn load(path: impl AsRef<Path>) -> AmiResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            AmiError::Configuration(format!("cannot read plate file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate plate TOML.
    pub fn from_toml_str(text: &str) -> AmiResult<Self> {
        let plate: PlateConfig = toml::from_str(text)
            .map_err(|e| AmiError::Configuration(format!("invalid plate file: {}", e)))?;
        plate.validate()?;
        Ok(plate)
    }

    /// Serialize to TOML.
    pub fn to_toml_string(&self) -> AmiResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| AmiError::Configuration(format!("cannot serialize plate: {}", e)))
    }

    /// Write the plate to `path` as TOML.
    pub fn save(&self, path: impl AsRef<Path>) -> AmiResult<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Mutable reference to the stored position of `corner`.
    pub fn corner_mut(&mut self, corner: Corner) -> &mut MachinePosition {
        match corner {
            Corner::TopLeft => &mut self.corner_tl,
            Corner::TopRight => &mut self.corner_tr,
            Corner::BottomLeft => &mut self.corner_bl,
            Corner::BottomRight => &mut self.corner_br,
        }
    }

    /// Stored position of `corner`.
    pub fn corner(&self, corner: Corner) -> MachinePosition {
        match corner {
            Corner::TopLeft => self.corner_tl,
            Corner::TopRight => self.corner_tr,
            Corner::BottomLeft => self.corner_bl,
            Corner::BottomRight => self.corner_br,
        }
    }

    /// Total number of sample points on the plate.
    pub fn total_samples(&self) -> usize {
        self.nx * self.ny * self.samples_per_well
    }

    /// Semantic validation of a parsed plate.
    ///
    /// Corner geometry is checked separately by [`PlateConfig::check_corners`]
    /// since a freshly created plate is allowed to be uncalibrated.
    pub fn validate(&self) -> AmiResult<()> {
        if self.nx <= 1 {
            return Err(AmiError::Configuration(format!(
                "nx must be greater than 1, got {}",
                self.nx
            )));
        }
        if self.ny <= 1 {
            return Err(AmiError::Configuration(format!(
                "ny must be greater than 1, got {}",
                self.ny
            )));
        }
        if self.ny > ROW_LETTERS.len() {
            return Err(AmiError::Configuration(format!(
                "ny must be at most {} (one letter per row), got {}",
                ROW_LETTERS.len(),
                self.ny
            )));
        }
        if self.samples_per_well == 0 || self.samples_per_well > ROW_LETTERS.len() {
            return Err(AmiError::Configuration(format!(
                "samples_per_well must be between 1 and {}, got {}",
                ROW_LETTERS.len(),
                self.samples_per_well
            )));
        }
        if self.subsample_offsets.len() != self.samples_per_well {
            return Err(AmiError::Configuration(format!(
                "samples_per_well is {} but {} sub-sample offsets are stored",
                self.samples_per_well,
                self.subsample_offsets.len()
            )));
        }
        if !(self.z_step.is_finite() && self.z_step > 0.0) {
            return Err(AmiError::Configuration(format!(
                "z_step must be positive, got {}",
                self.z_step
            )));
        }
        if self.n_focus_images == 0 {
            return Err(AmiError::Configuration(
                "n_focus_images must be at least 1".to_string(),
            ));
        }
        for (name, value) in [("sample_id", &self.sample_id), ("plate_id", &self.plate_id)] {
            if value.is_empty()
                || value
                    .chars()
                    .any(|c| c.is_whitespace() || c == '/' || c == '\\')
            {
                return Err(AmiError::Configuration(format!(
                    "{} must be a non-empty name without spaces or path separators, got {:?}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}
