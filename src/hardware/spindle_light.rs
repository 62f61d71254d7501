//! Light wired to the controller's spindle output.

use ami_driver_grbl::MotionProtocol;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::hardware::capabilities::DigitalOutput;

/// `M3` switches the light on, `M5` off.
///
/// Brightness follows the spindle speed, which start-up sets to its maximum.
pub struct SpindleLight {
    motion: Arc<dyn MotionProtocol>,
}

impl SpindleLight {
    /// Light driven through `motion`.
    pub fn new(motion: Arc<dyn MotionProtocol>) -> Self {
        Self { motion }
    }
}

#[async_trait]
impl DigitalOutput for SpindleLight {
    async fn set(&self, high: bool) -> Result<()> {
        self.motion.spindle_control(true, high).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{CallLog, MockMotion};

    #[tokio::test]
    async fn spindle_words() {
        let log = CallLog::new();
        let light = SpindleLight::new(Arc::new(MockMotion::new(log.clone())));
        light.set(true).await.unwrap();
        light.set(false).await.unwrap();
        assert_eq!(log.entries(), ["M3", "M5"]);
    }
}
