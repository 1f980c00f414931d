//! Timeout-bounded request/response framing over a duplex byte stream.
//!
//! The controller answers each command with a block of CR-LF lines closed by
//! one blank line. [`LineChannel::read_block`] collects exactly the lines
//! before that blank line, and turns device silence into an explicit
//! [`ReadBlockError::Timeout`] instead of waiting forever.
//!
//! Two independent bounds apply to every block:
//! - an overall wall-clock deadline measured from the start of the call, and
//! - a budget of consecutive empty read cycles. One cycle is a read that
//!   produced no new bytes within `read_timeout`, or an end-of-file.
//!
//! A timed-out block leaves the link out of step: the device may still
//! answer the abandoned command. The channel then discards whatever is
//! waiting before the next command goes out, so a late reply is never read
//! as the answer to a newer command.

use crate::protocol::LINE_TERMINATOR;
use std::time::Duration;
use tcon_core::serial::{drain_serial_buffer, DynSerial};
use tcon_core::{StageError, StageResult};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::Instant;

/// Quiet period used to flush a late reply after a timed-out block.
pub const RESYNC_WINDOW: Duration = Duration::from_millis(100);

/// Bounds applied to each response block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLimits {
    /// Wall-clock bound for one whole block.
    pub overall_timeout: Duration,
    /// Consecutive empty read cycles tolerated before giving up.
    pub max_empty_reads: u32,
    /// Length of one read cycle; emulates the port's hardware read timeout.
    pub read_timeout: Duration,
}

impl Default for BlockLimits {
    fn default() -> Self {
        Self {
            overall_timeout: Duration::from_secs(5),
            max_empty_reads: 20,
            read_timeout: Duration::from_millis(250),
        }
    }
}

/// Failure to read a complete response block.
#[derive(Debug, Error)]
pub enum ReadBlockError {
    /// Deadline passed or the empty-read budget ran out before the blank
    /// terminator arrived.
    #[error("No block terminator after {waited:?} ({empty_reads} consecutive empty reads)")]
    Timeout {
        /// Time spent in the call.
        waited: Duration,
        /// Consecutive empty read cycles at the moment of failure.
        empty_reads: u32,
    },

    /// The transport reported an error.
    #[error("Transport read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ReadBlockError {
    /// Attach the command whose answer was awaited.
    pub fn into_stage_error(self, command: &str) -> StageError {
        match self {
            ReadBlockError::Timeout {
                waited,
                empty_reads,
            } => StageError::DeviceUnresponsive {
                command: command.to_string(),
                waited,
                empty_reads,
            },
            ReadBlockError::Io(e) => StageError::Io(e),
        }
    }
}

/// Line-framed channel owning the transport.
pub struct LineChannel {
    port: BufReader<DynSerial>,
    limits: BlockLimits,
    out_of_step: bool,
}

impl std::fmt::Debug for LineChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineChannel")
            .field("limits", &self.limits)
            .field("out_of_step", &self.out_of_step)
            .finish_non_exhaustive()
    }
}

impl LineChannel {
    /// Wrap an opened transport.
    pub fn new(port: DynSerial, limits: BlockLimits) -> Self {
        Self {
            port: BufReader::new(port),
            limits,
            out_of_step: false,
        }
    }

    /// Write one command line and flush.
    ///
    /// If the previous block timed out, pending input is discarded first.
    pub async fn send(&mut self, command: &str) -> StageResult<()> {
        if self.out_of_step {
            let dropped = self.discard_stale_input(RESYNC_WINDOW).await;
            tracing::info!(dropped, command, "Resynchronised after timed-out block");
            self.out_of_step = false;
        }
        tracing::debug!(command, "tx");
        let writer = self.port.get_mut();
        writer
            .write_all(format!("{}{}", command, LINE_TERMINATOR).as_bytes())
            .await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one response block using the configured limits.
    pub async fn read_block(&mut self) -> Result<Vec<String>, ReadBlockError> {
        self.read_block_with(self.limits.overall_timeout, self.limits.max_empty_reads)
            .await
    }

    /// Read one response block with explicit bounds.
    ///
    /// Returns the lines preceding the blank terminator, trimmed, in arrival
    /// order. Each call starts a fresh accumulation; bytes of an unfinished
    /// line are dropped when the call fails. A timeout marks the channel out
    /// of step until the next [`LineChannel::send`].
    pub async fn read_block_with(
        &mut self,
        overall_timeout: Duration,
        max_empty_reads: u32,
    ) -> Result<Vec<String>, ReadBlockError> {
        let result = self.collect_block(overall_timeout, max_empty_reads).await;
        if matches!(result, Err(ReadBlockError::Timeout { .. })) {
            self.out_of_step = true;
        }
        result
    }

    async fn collect_block(
        &mut self,
        overall_timeout: Duration,
        max_empty_reads: u32,
    ) -> Result<Vec<String>, ReadBlockError> {
        let started = Instant::now();
        // None: the bound lies beyond what Instant can represent.
        let deadline = started.checked_add(overall_timeout);
        let mut lines = Vec::new();
        let mut pending = Vec::new();
        let mut empty_reads = 0u32;

        loop {
            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) || empty_reads >= max_empty_reads {
                tracing::debug!(?lines, empty_reads, "Block incomplete");
                return Err(ReadBlockError::Timeout {
                    waited: now.duration_since(started),
                    empty_reads,
                });
            }

            let cycle = match deadline {
                Some(d) => self.limits.read_timeout.min(d - now),
                None => self.limits.read_timeout,
            };
            let before = pending.len();
            // read_until is cancel safe: a partial line stays in `pending`.
            match tokio::time::timeout(cycle, self.port.read_until(b'\n', &mut pending)).await {
                Err(_) => {
                    if pending.len() == before {
                        empty_reads += 1;
                    } else {
                        empty_reads = 0;
                    }
                    continue;
                }
                Ok(Err(e)) => return Err(ReadBlockError::Io(e)),
                Ok(Ok(0)) => {
                    empty_reads += 1;
                    continue;
                }
                Ok(Ok(_)) => {}
            }

            // A full line, or trailing bytes before end-of-file.
            empty_reads = 0;
            let line = String::from_utf8_lossy(&pending).trim().to_string();
            pending.clear();
            if line.is_empty() {
                tracing::trace!(lines = lines.len(), "rx block");
                return Ok(lines);
            }
            tracing::trace!(line = %line, "rx");
            lines.push(line);
        }
    }

    /// Send `command` and read its response block.
    pub async fn transact(&mut self, command: &str) -> StageResult<Vec<String>> {
        self.send(command).await?;
        self.read_block()
            .await
            .map_err(|e| e.into_stage_error(command))
    }

    /// Discard input already waiting on the link. Returns bytes dropped.
    pub async fn discard_stale_input(&mut self, window: Duration) -> usize {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        let dropped = drain_serial_buffer(&mut self.port, window_ms).await;
        if dropped > 0 {
            tracing::debug!(dropped, "Discarded stale input");
        }
        dropped
    }

    /// Close the transport. Errors are logged; the stream is dropped with
    /// the channel either way.
    pub async fn close(&mut self) {
        if let Err(e) = self.port.get_mut().shutdown().await {
            tracing::warn!(error = %e, "Transport shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcon_core::mock_serial;

    fn limits() -> BlockLimits {
        BlockLimits {
            overall_timeout: Duration::from_secs(2),
            max_empty_reads: 5,
            read_timeout: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_block_excludes_terminator() {
        let (port, device) = mock_serial::new();
        let mut channel = LineChannel::new(Box::new(port), limits());

        device.send_block(&["Move = 0", "PC2 = 800"]).unwrap();
        let lines = channel.read_block().await.unwrap();
        assert_eq!(lines, vec!["Move = 0", "PC2 = 800"]);
    }

    #[tokio::test]
    async fn test_blocks_are_read_one_at_a_time() {
        let (port, device) = mock_serial::new();
        let mut channel = LineChannel::new(Box::new(port), limits());

        device
            .send_response(b"Move = 1\r\n\r\nMove = 0, PC2 = 800\r\n\r\n")
            .unwrap();
        assert_eq!(channel.read_block().await.unwrap(), vec!["Move = 1"]);
        assert_eq!(
            channel.read_block().await.unwrap(),
            vec!["Move = 0, PC2 = 800"]
        );
    }

    #[tokio::test]
    async fn test_line_split_across_chunks() {
        let (port, device) = mock_serial::new();
        let mut channel = LineChannel::new(Box::new(port), limits());

        let reader = tokio::spawn(async move { channel.read_block().await });
        device.send_response(b"PC").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        device.send_response(b"2 = -150\r").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        device.send_response(b"\n\r\n").unwrap();

        assert_eq!(reader.await.unwrap().unwrap(), vec!["PC2 = -150"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_times_out_within_one_read_cycle() {
        let (port, device) = mock_serial::new();
        let mut channel = LineChannel::new(
            Box::new(port),
            BlockLimits {
                overall_timeout: Duration::from_secs(1),
                max_empty_reads: u32::MAX,
                read_timeout: Duration::from_millis(300),
            },
        );

        // Text but never the blank terminator.
        device.send_response(b"Move = 1\r\n").unwrap();
        let started = Instant::now();
        let err = channel.read_block().await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, ReadBlockError::Timeout { .. }));
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed <= Duration::from_millis(1300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_read_budget() {
        let (port, _device) = mock_serial::new();
        let mut channel = LineChannel::new(Box::new(port), limits());

        let err = channel.read_block().await.unwrap_err();
        match err {
            ReadBlockError::Timeout {
                waited,
                empty_reads,
            } => {
                assert_eq!(empty_reads, 5);
                assert!(waited < Duration::from_secs(2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_hang_up_is_unresponsive() {
        let (port, mut device) = mock_serial::new();
        let mut channel = LineChannel::new(Box::new(port), limits());
        device.hang_up();

        let err = channel.transact("r2").await.unwrap_err();
        assert!(matches!(
            err,
            StageError::DeviceUnresponsive { ref command, .. } if command == "r2"
        ));
    }

    #[tokio::test]
    async fn test_transact_writes_crlf() {
        let (port, mut device) = mock_serial::new();
        let mut channel = LineChannel::new(Box::new(port), limits());

        let task = tokio::spawn(async move { channel.transact("v2 100").await });
        device.expect_and_respond("v2 100", &[]).await;
        assert!(task.await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discard_stale_input() {
        let (port, device) = mock_serial::new();
        let mut channel = LineChannel::new(Box::new(port), limits());

        device.send_response(b"banner v1.0\r\n").unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(channel.discard_stale_input(Duration::from_millis(50)).await, 13);
    }

    #[tokio::test]
    async fn test_late_reply_is_discarded_after_timeout() {
        let (port, mut device) = mock_serial::new();
        let mut channel = LineChannel::new(
            Box::new(port),
            BlockLimits {
                overall_timeout: Duration::from_millis(300),
                max_empty_reads: 3,
                read_timeout: Duration::from_millis(50),
            },
        );

        let err = channel.transact("r2").await.unwrap_err();
        assert!(matches!(err, StageError::DeviceUnresponsive { .. }));
        assert!(channel.out_of_step);
        device.expect_command("r2").await;

        // The answer to the abandoned query shows up late.
        device.send_block(&["PC2 = 111"]).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let task = tokio::spawn(async move {
            let lines = channel.transact("r2").await;
            (channel, lines)
        });
        device.expect_and_respond("r2", &["PC2 = 222"]).await;

        let (channel, lines) = task.await.unwrap();
        assert_eq!(lines.unwrap(), vec!["PC2 = 222"]);
        assert!(!channel.out_of_step);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_overall_timeout_does_not_overflow() {
        let (port, _device) = mock_serial::new();
        let mut channel = LineChannel::new(Box::new(port), limits());

        let err = channel
            .read_block_with(Duration::MAX, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, ReadBlockError::Timeout { empty_reads: 2, .. }));
    }
}
