//! Shared async serial types for the motion controller link.
//!
//! The port is wrapped once in a [`SharedPort`]. Whoever holds its lock owns the
//! byte stream for a full command/response exchange, which is how commands stay
//! strictly ordered on a channel without request IDs.
//!
//! Opening a real port needs the `serial` feature:
//!
//! ```toml
//! [dependencies]
//! ami-core = { path = "../ami-core", features = ["serial"] }
//! ```
//!
//! Tests substitute `tokio::io::duplex` streams for hardware.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::sync::Mutex;

/// Anything usable as a serial line: real ports, duplex pipes, mocks.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Serial port with buffered line reading behind an async mutex.
pub type SharedPort = Arc<Mutex<BufReader<DynSerial>>>;

/// Wrap a port for shared, line-oriented use.
pub fn wrap_shared(port: DynSerial) -> SharedPort {
    Arc::new(Mutex::new(BufReader::new(port)))
}

/// Open the motion controller's port at `baud_rate`, 8N1, no flow control.
///
/// Opening touches the device node synchronously, so it runs on the blocking
/// pool.
#[cfg(feature = "serial")]
pub async fn open_serial_async(path: &str, baud_rate: u32) -> anyhow::Result<DynSerial> {
    use anyhow::Context;
    use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};

    let path = path.to_string();
    let stream = tokio::task::spawn_blocking(move || {
        tokio_serial::new(&path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
            .with_context(|| format!("cannot open motion controller port {} at {} baud", path, baud_rate))
    })
    .await
    .context("serial open task panicked")??;
    tracing::info!(baud_rate, "motion controller port open");
    Ok(Box::new(stream))
}

/// Read and discard whatever arrives within `window`.
///
/// Used after waking the controller to throw away its start-up banner.
/// Returns the number of bytes discarded.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, window: Duration) -> usize {
    let mut chunk = [0u8; 128];
    let deadline = tokio::time::Instant::now() + window;
    let mut discarded = 0;
    while let Ok(Ok(n @ 1..)) = tokio::time::timeout_at(deadline, port.read(&mut chunk)).await {
        discarded += n;
    }
    if discarded > 0 {
        tracing::debug!(bytes = discarded, "discarded controller banner");
    }
    discarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn shared_port_reads_lines() {
        let (mut host, device) = tokio::io::duplex(64);
        let port = wrap_shared(Box::new(device));

        host.write_all(b"ok\n").await.unwrap();

        let mut guard = port.lock().await;
        let mut line = String::new();
        guard.read_line(&mut line).await.unwrap();
        assert_eq!(line.trim(), "ok");
    }

    #[tokio::test]
    async fn drain_discards_banner() {
        let (mut host, mut device) = tokio::io::duplex(64);
        host.write_all(b"Grbl 1.1h ['$' for help]\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let discarded = drain_serial_buffer(&mut device, Duration::from_millis(50)).await;
        assert_eq!(discarded, 26);
    }
}
