//! Sysfs GPIO lines.
//!
//! Lines live under `<root>/gpio<N>/{direction,value}`; a line that is not yet
//! exported is exported by writing its number to `<root>/export`.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::hardware::capabilities::{DigitalInput, DigitalOutput};

/// How long to wait for the kernel to create an exported line's directory.
const EXPORT_WAIT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    In,
    Out,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

/// One exported GPIO line.
#[derive(Debug, Clone)]
pub struct SysfsPin {
    pin: u32,
    value_path: PathBuf,
}

impl SysfsPin {
    /// Export `pin` under `root` if needed and configure it as an output, driven low.
    pub async fn output(root: &Path, pin: u32) -> Result<Self> {
        let line = Self::open(root, pin, Direction::Out).await?;
        line.write(false).await?;
        Ok(line)
    }

    /// Export `pin` under `root` if needed and configure it as an input.
    pub async fn input(root: &Path, pin: u32) -> Result<Self> {
        Self::open(root, pin, Direction::In).await
    }

    async fn open(root: &Path, pin: u32, direction: Direction) -> Result<Self> {
        let dir = root.join(format!("gpio{}", pin));
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            tokio::fs::write(root.join("export"), pin.to_string())
                .await
                .with_context(|| format!("failed to export GPIO {}", pin))?;
            let deadline = tokio::time::Instant::now() + EXPORT_WAIT;
            while !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
                if tokio::time::Instant::now() >= deadline {
                    return Err(anyhow!("GPIO {} did not appear after export", pin));
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        tokio::fs::write(dir.join("direction"), direction.as_str())
            .await
            .with_context(|| format!("failed to set GPIO {} direction", pin))?;
        tracing::debug!(pin, direction = direction.as_str(), "GPIO line ready");

        Ok(Self {
            pin,
            value_path: dir.join("value"),
        })
    }

    /// BCM pin number.
    pub fn pin(&self) -> u32 {
        self.pin
    }

    async fn write(&self, high: bool) -> Result<()> {
        tokio::fs::write(&self.value_path, if high { "1" } else { "0" })
            .await
            .with_context(|| format!("failed to write GPIO {}", self.pin))
    }
}

#[async_trait]
impl DigitalOutput for SysfsPin {
    async fn set(&self, high: bool) -> Result<()> {
        self.write(high).await
    }
}

#[async_trait]
impl DigitalInput for SysfsPin {
    async fn read(&self) -> Result<bool> {
        let raw = tokio::fs::read_to_string(&self.value_path)
            .await
            .with_context(|| format!("failed to read GPIO {}", self.pin))?;
        match raw.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(anyhow!("GPIO {} value is {:?}", self.pin, other)),
        }
    }
}
