//! Operator-facing status messages.
//!
//! The controller reports every outcome (a saved corner, a rejected address, a
//! finished run) as one human-readable line. Where the line goes is up to the
//! front end; the CLI mirrors them into the log.

/// Receiver of status lines.
pub trait StatusSink: Send + Sync {
    /// Show one status line.
    fn report(&self, message: &str);
}

/// Emits each status line as an `info` event on the `ami::status` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn report(&self, message: &str) {
        tracing::info!(target: "ami::status", "{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn status_lines_reach_the_log() {
        TracingStatusSink.report("TL coordinates saved");
        assert!(logs_contain("TL coordinates saved"));
    }
}
