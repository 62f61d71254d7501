//! Response-wait strategies.
//!
//! [`GrblClient`](crate::GrblClient) writes a command and then hands the port to
//! a [`ResponseWaiter`] to collect exactly one response unit. Swapping the
//! waiter is the only difference between talking to real hardware and running
//! against a simulated controller.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

use ami_core::serial::DynSerial;
use ami_core::ProtocolError;

use crate::protocol::{ProtocolResult, Reply, ResponseLine};

/// Status report returned by a simulated controller for every command.
pub const DEFAULT_SIMULATED_STATUS: &str =
    "<Idle,MPos:0.000,0.000,0.000,WPos:0.000,0.000,0.000>";

/// Strategy for collecting the response to one command.
#[async_trait]
pub trait ResponseWaiter: Send + Sync {
    /// Collect one response unit for `command`, which has just been written.
    ///
    /// The caller holds the port lock for the whole exchange.
    async fn wait_for_response(
        &self,
        port: &mut BufReader<DynSerial>,
        command: &str,
        timeout: Duration,
    ) -> ProtocolResult<Reply>;
}

/// Reads lines from the serial port until a terminating line arrives.
///
/// Status reports, feedback messages, banners and blank lines are collected or
/// skipped; `ok`, `error:`, `ALARM:` and unrecognized lines end the unit.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialResponseWaiter;

#[async_trait]
impl ResponseWaiter for SerialResponseWaiter {
    async fn wait_for_response(
        &self,
        port: &mut BufReader<DynSerial>,
        command: &str,
        timeout: Duration,
    ) -> ProtocolResult<Reply> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut lines = Vec::new();

        loop {
            let mut raw = String::new();
            let read = tokio::time::timeout_at(deadline, port.read_line(&mut raw))
                .await
                .map_err(|_| ProtocolError::Timeout {
                    command: command.to_string(),
                    timeout,
                })?
                .map_err(|source| ProtocolError::Read {
                    command: command.to_string(),
                    source,
                })?;
            if read == 0 {
                return Err(ProtocolError::ConnectionLost {
                    command: command.to_string(),
                });
            }

            let line = raw.trim().to_string();
            tracing::debug!(command, response = %line, "grbl <-");
            match ResponseLine::classify(&line) {
                ResponseLine::Empty => continue,
                ResponseLine::Banner(_) | ResponseLine::Message(_) => {
                    lines.push(line);
                }
                kind => {
                    let terminal = kind.is_terminal();
                    lines.push(line);
                    if terminal {
                        return Ok(Reply::new(lines));
                    }
                }
            }
        }
    }
}

/// Answers every command with a canned status report without reading the port.
#[derive(Debug, Clone)]
pub struct SimulatedResponseWaiter {
    status: String,
}

impl SimulatedResponseWaiter {
    /// Waiter answering with `status`.
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
        }
    }
}

impl Default for SimulatedResponseWaiter {
    fn default() -> Self {
        Self::new(DEFAULT_SIMULATED_STATUS)
    }
}

#[async_trait]
impl ResponseWaiter for SimulatedResponseWaiter {
    async fn wait_for_response(
        &self,
        _port: &mut BufReader<DynSerial>,
        command: &str,
        _timeout: Duration,
    ) -> ProtocolResult<Reply> {
        tracing::trace!(command, status = %self.status, "simulated grbl reply");
        Ok(Reply::new(vec![self.status.clone()]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn port_pair() -> (tokio::io::DuplexStream, BufReader<DynSerial>) {
        let (host, device) = tokio::io::duplex(256);
        (host, BufReader::new(Box::new(device) as DynSerial))
    }

    #[tokio::test]
    async fn reads_through_status_to_ok() {
        let (mut host, mut port) = port_pair();
        host.write_all(b"[MSG:Caution: Unlocked]\r\n<Idle,MPos:1,2,3,WPos:1,2,3>\r\nok\r\n")
            .await
            .unwrap();

        let reply = SerialResponseWaiter
            .wait_for_response(&mut port, "?", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply.lines().len(), 3);
        assert_eq!(reply.status_line(), Some("<Idle,MPos:1,2,3,WPos:1,2,3>"));
    }

    #[tokio::test]
    async fn times_out_without_terminator() {
        let (mut host, mut port) = port_pair();
        host.write_all(b"<Run,MPos:1,2,3,WPos:1,2,3>\n").await.unwrap();

        let err = SerialResponseWaiter
            .wait_for_response(&mut port, "?", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout { .. }));
    }

    #[tokio::test]
    async fn eof_is_connection_lost() {
        let (host, mut port) = port_pair();
        drop(host);

        let err = SerialResponseWaiter
            .wait_for_response(&mut port, "$X", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_connection_lost());
    }

    #[tokio::test]
    async fn simulated_waiter_never_reads() {
        let (_host, mut port) = port_pair();
        let reply = SimulatedResponseWaiter::default()
            .wait_for_response(&mut port, "$H", Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(reply.lines(), [DEFAULT_SIMULATED_STATUS.to_string()]);
    }
}
