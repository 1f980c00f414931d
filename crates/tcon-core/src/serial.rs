//! Serial Port Abstractions
//!
//! The controller link is modelled as a duplex byte stream. Anything that is
//! `AsyncRead + AsyncWrite + Unpin + Send` can stand in for the port:
//! - `tokio_serial::SerialStream` (real hardware)
//! - `tokio::io::DuplexStream` (testing)
//! - [`crate::mock_serial::MockSerialPort`] (scripted device)
//!
//! # Utilities
//!
//! - [`open_serial_exclusive`]: open a port with spawn_blocking and claim it
//!   exclusively at the OS level
//! - [`drain_serial_buffer`]: discard stale input before the first command
//!
//! # Example
//!
//! ```rust,ignore
//! use tcon_core::serial::{open_serial_exclusive, drain_serial_buffer, DynSerial};
//!
//! let mut port: DynSerial = Box::new(open_serial_exclusive("/dev/ttyUSB0", 9600, "stage").await?);
//! let discarded = drain_serial_buffer(&mut port, 50).await;
//! ```

use crate::error::{StageError, StageResult};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

/// Trait alias for async serial port I/O.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

// Blanket implementation for all types meeting the requirements
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Open a serial port asynchronously and claim it exclusively.
///
/// Standard settings are applied: 8N1, no flow control. On unix the opened
/// descriptor is additionally marked exclusive (TIOCEXCL) so a second open
/// of the same device fails with `EBUSY`, even from a process that bypassed
/// the instance lock.
///
/// # Errors
///
/// Returns [`StageError::TransportUnavailable`] if the port is missing, busy,
/// or cannot be claimed.
pub async fn open_serial_exclusive(
    port_path: &str,
    baud_rate: u32,
    device_name: &str,
) -> StageResult<tokio_serial::SerialStream> {
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();
    let unavailable = |reason: String| StageError::TransportUnavailable {
        port: port_path.to_string(),
        reason,
    };

    let opened = spawn_blocking(move || {
        let mut stream = tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()?;

        #[cfg(unix)]
        stream.set_exclusive(true)?;

        Ok::<_, tokio_serial::Error>(stream)
    })
    .await
    .map_err(|e| unavailable(format!("open task failed: {}", e)))?;

    let stream = opened.map_err(|e| unavailable(e.to_string()))?;
    tracing::info!(port = port_path, baud_rate, device = device_name, "Opened serial port (exclusive)");
    Ok(stream)
}

/// Drain stale data from a serial port buffer.
///
/// Reads and discards input until nothing arrives for `timeout_ms`
/// milliseconds or the overall window closes. Returns the number of bytes
/// discarded.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, timeout_ms: u64) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    let mut total_discarded = 0usize;

    loop {
        if tokio::time::Instant::now() >= deadline {
            break;
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, port.read(&mut discard)).await {
            Ok(Ok(0)) => break, // EOF or no more data
            Ok(Ok(n)) => {
                total_discarded += n;
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Ok(Err(_)) => break, // Real I/O error, abort drain
            Err(_) => break,     // Timeout, no more immediate data
        }
    }

    total_discarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_dyn_serial_accepts_duplex() {
        let (mut host, device) = tokio::io::duplex(64);
        let mut port: DynSerial = Box::new(device);

        host.write_all(b"r2\r\n").await.unwrap();

        let mut buf = [0u8; 4];
        port.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"r2\r\n");
    }

    #[tokio::test]
    async fn test_drain_serial_buffer() {
        let (mut host, mut device) = tokio::io::duplex(64);

        host.write_all(b"stale data 12345").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let discarded = drain_serial_buffer(&mut device, 50).await;
        assert_eq!(discarded, 16);
    }

    #[tokio::test]
    async fn test_open_missing_port_is_transport_unavailable() {
        let err = open_serial_exclusive("/dev/tcon-does-not-exist", 9600, "test")
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::TransportUnavailable { .. }));
    }
}
