//! `ami-core`
//!
//! Plate model and shared types for the AMi plate imager.
//!
//! ## Contents
//!
//! - [`PlateConfig`]: grid size, calibrated corners, sub-sample offsets and
//!   imaging parameters, loaded from TOML
//! - [`PlateConfig::resolve`]: bilinear interpolation from `(row, col, sample)` to a
//!   [`MachinePosition`]
//! - [`labels`]: well labels (`B4`, `B4a`) and operator address parsing
//! - [`TravelLimits`]: the machine travel box
//! - [`AmiError`]: the error taxonomy shared by every crate
//! - [`serial`]: async serial port types used by the motion controller driver
//!
//! ## Example
//!
//! ```rust
//! use ami_core::{MachinePosition, PlateConfig};
//!
//! let plate = PlateConfig::new(2, 2, 1).with_corners(
//!     MachinePosition::new(0.0, 0.0, 0.0),
//!     MachinePosition::new(10.0, 0.0, 0.0),
//!     MachinePosition::new(0.0, 10.0, 0.0),
//!     MachinePosition::new(10.0, 10.0, 0.0),
//! );
//! assert_eq!(plate.resolve(1, 1, 0)?, MachinePosition::new(10.0, 10.0, 0.0));
//! # Ok::<(), ami_core::AmiError>(())
//! ```

pub mod error;
mod geometry;
pub mod labels;
pub mod limits;
pub mod plate;
pub mod serial;

pub use error::{AmiError, AmiResult, ProtocolError};
pub use labels::{row_col_from_label, sample_label, subsample_label, well_label, WellAddress};
pub use limits::TravelLimits;
pub use plate::{Corner, MachinePosition, PlateConfig, SubsampleOffset};
