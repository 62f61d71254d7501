//! Hardware capabilities used by the device controller.
//!
//! Each concern of the imager's peripheral hardware is a small trait:
//!
//! - A light is a `DigitalOutput`
//! - The "movement complete" line is a `DigitalInput`
//! - The camera is both `Previewable` and a `CaptureSink`
//!
//! The motion controller itself is
//! [`MotionProtocol`](ami_driver_grbl::MotionProtocol), defined next to the GRBL
//! client.
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

/// Capability: Digital Output
///
/// A single on/off line such as a light.
#[async_trait]
pub trait DigitalOutput: Send + Sync {
    /// Drive the line high (`true`) or low (`false`).
    async fn set(&self, high: bool) -> Result<()>;
}

/// Capability: Digital Input
///
/// A single line sampled on demand.
#[async_trait]
pub trait DigitalInput: Send + Sync {
    /// Current level, `true` for high.
    async fn read(&self) -> Result<bool>;
}

/// Capability: Live Preview
///
/// # Contract
/// - Starting an active preview or stopping an inactive one is harmless
#[async_trait]
pub trait Previewable: Send + Sync {
    /// Show the live camera view.
    async fn start_preview(&self) -> Result<()>;

    /// Hide the live camera view.
    async fn stop_preview(&self) -> Result<()>;
}

/// Capability: Image Capture
///
/// Saves one still image; the format follows the file extension.
#[async_trait]
pub trait CaptureSink: Send + Sync {
    /// Capture a still to `path`. Parent directories already exist.
    async fn capture(&self, path: &Path) -> Result<()>;
}
