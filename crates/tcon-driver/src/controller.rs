//! Per-axis command sequencing and the poll-until-settled loop.
//!
//! ```text
//! Idle -> Commanded -> Polling -> Settled
//!             |           |
//!             +-----------+-----> Stalled
//! ```
//!
//! A motion command is `d<axis> <steps>` followed by `abs<axis>` (or a single
//! `rtncr<axis>` for a reference return), each confirmed by one response
//! block. The controller then issues `r<axis>` until the device reports
//! `Move = 0`, sleeping the settle delay between polls.
//!
//! Nothing here retries a motion command: after a timeout the first command
//! may already be executing.

use crate::channel::LineChannel;
use crate::protocol;
use crate::response::{DeviceStatus, ResponseParser};
use std::time::Duration;
use tcon_core::{Axis, StageError, StageResult};
use tokio::time::Instant;
use tracing::instrument;

/// Lifecycle of the most recent operation on an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisState {
    /// No operation issued yet.
    Idle,
    /// Motion command written, not yet confirmed.
    Commanded,
    /// Status polling in progress.
    Polling,
    /// Device reported stopped with a known position.
    Settled,
    /// Operation aborted by a device error or timeout.
    Stalled,
}

/// Poll-loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// Pause between status queries while moving.
    pub settle_delay: Duration,
    /// Bound on one whole poll loop.
    pub motion_timeout: Duration,
    /// Extra status queries allowed after settling without a position.
    pub position_retries: u32,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(1),
            motion_timeout: Duration::from_secs(300),
            position_retries: 3,
        }
    }
}

/// Result of a completed motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionOutcome {
    /// Position reported once the axis stopped.
    pub position_steps: i64,
    /// Status queries issued.
    pub polls: u32,
}

/// Command sequencer for one axis.
#[derive(Debug)]
pub struct AxisController {
    axis: Axis,
    parser: ResponseParser,
    timing: PollTiming,
    state: AxisState,
    last_position: Option<i64>,
}

impl AxisController {
    /// Controller for `axis`. `error_token` is the controller's rejection
    /// marker.
    pub fn new(axis: Axis, timing: PollTiming, error_token: &str) -> Self {
        let parser = ResponseParser::with_error_token(axis.id(), error_token);
        Self {
            axis,
            parser,
            timing,
            state: AxisState::Idle,
            last_position: None,
        }
    }

    /// The controlled axis.
    pub fn axis(&self) -> &Axis {
        &self.axis
    }

    /// State after the most recent operation.
    pub fn state(&self) -> AxisState {
        self.state
    }

    /// Last position from a settled poll, `None` if never read.
    pub fn last_position(&self) -> Option<i64> {
        self.last_position
    }

    /// Send velocity and start velocity.
    #[instrument(skip(self, channel), fields(axis = %self.axis.name()), err)]
    pub async fn configure_velocity(
        &mut self,
        channel: &mut LineChannel,
        velocity: u32,
        start_velocity: u32,
    ) -> StageResult<()> {
        self.confirm(channel, &protocol::velocity(self.axis.id(), velocity))
            .await?;
        self.confirm(
            channel,
            &protocol::start_velocity(self.axis.id(), start_velocity),
        )
        .await?;
        Ok(())
    }

    /// Absolute move to `target` steps, returning once the axis stops.
    #[instrument(skip(self, channel), fields(axis = %self.axis.name()), err)]
    pub async fn move_to(
        &mut self,
        channel: &mut LineChannel,
        target: i64,
    ) -> StageResult<MotionOutcome> {
        self.state = AxisState::Commanded;
        self.confirm(channel, &protocol::set_target(self.axis.id(), target))
            .await?;
        self.confirm(channel, &protocol::execute_absolute(self.axis.id()))
            .await?;
        self.poll_until_settled(channel).await
    }

    /// Return to the hardware reference switch, which becomes the new zero.
    #[instrument(skip(self, channel), fields(axis = %self.axis.name()), err)]
    pub async fn reset_to_reference(
        &mut self,
        channel: &mut LineChannel,
    ) -> StageResult<MotionOutcome> {
        self.state = AxisState::Commanded;
        self.confirm(channel, &protocol::return_to_reference(self.axis.id()))
            .await?;
        self.poll_until_settled(channel).await
    }

    /// Query the current position without commanding motion.
    #[instrument(skip(self, channel), fields(axis = %self.axis.name()), err)]
    pub async fn read_position(&mut self, channel: &mut LineChannel) -> StageResult<i64> {
        let attempts = self.timing.position_retries + 1;
        for _ in 0..attempts {
            let status = self.query_status(channel).await?;
            if let Some(steps) = status.position_steps {
                self.last_position = Some(steps);
                return Ok(steps);
            }
        }
        Err(StageError::PositionUnavailable {
            axis: self.axis.name().to_string(),
            attempts,
        })
    }

    async fn poll_until_settled(
        &mut self,
        channel: &mut LineChannel,
    ) -> StageResult<MotionOutcome> {
        let started = Instant::now();
        self.state = AxisState::Polling;

        let mut moving = true;
        let mut position = None;
        let mut polls = 0u32;

        loop {
            if started.elapsed() > self.timing.motion_timeout {
                self.state = AxisState::Stalled;
                return Err(StageError::DeviceUnresponsive {
                    command: protocol::status_query(self.axis.id()),
                    waited: started.elapsed(),
                    empty_reads: 0,
                });
            }

            let status = self.query_status(channel).await?;
            polls += 1;
            if let Some(flag) = status.moving {
                moving = flag;
            }
            if status.position_steps.is_some() {
                position = status.position_steps;
            }
            tracing::debug!(polls, moving, ?position, "poll");

            if !moving {
                break;
            }
            tokio::time::sleep(self.timing.settle_delay).await;
        }

        let mut retries = 0;
        while position.is_none() && retries < self.timing.position_retries {
            retries += 1;
            let status = self.query_status(channel).await?;
            polls += 1;
            position = status.position_steps;
        }

        match position {
            Some(position_steps) => {
                self.state = AxisState::Settled;
                self.last_position = Some(position_steps);
                tracing::info!(position_steps, polls, "Axis settled");
                Ok(MotionOutcome {
                    position_steps,
                    polls,
                })
            }
            None => {
                self.state = AxisState::Stalled;
                Err(StageError::PositionUnavailable {
                    axis: self.axis.name().to_string(),
                    attempts: polls,
                })
            }
        }
    }

    async fn query_status(&mut self, channel: &mut LineChannel) -> StageResult<DeviceStatus> {
        self.confirm(channel, &protocol::status_query(self.axis.id()))
            .await
    }

    /// Send one command and read its block; the error token or any transport
    /// failure stalls the axis.
    async fn confirm(
        &mut self,
        channel: &mut LineChannel,
        command: &str,
    ) -> StageResult<DeviceStatus> {
        let lines = match channel.transact(command).await {
            Ok(lines) => lines,
            Err(e) => {
                self.state = AxisState::Stalled;
                return Err(e);
            }
        };

        let status = self.parser.parse_block(&lines);
        if status.syntax_error {
            self.state = AxisState::Stalled;
            return Err(StageError::ProtocolError {
                command: command.to_string(),
                response: status.error_line.unwrap_or_default(),
            });
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::BlockLimits;
    use tcon_core::{mock_serial, AxisKind};

    fn fast_timing() -> PollTiming {
        PollTiming {
            settle_delay: Duration::from_millis(5),
            motion_timeout: Duration::from_secs(5),
            position_retries: 2,
        }
    }

    fn controller() -> AxisController {
        let axis = Axis::new("position", "2", AxisKind::Linear, 0.001, 0, 1300);
        AxisController::new(axis, fast_timing(), protocol::DEFAULT_ERROR_TOKEN)
    }

    fn channel(port: mock_serial::MockSerialPort) -> LineChannel {
        LineChannel::new(
            Box::new(port),
            BlockLimits {
                overall_timeout: Duration::from_secs(1),
                max_empty_reads: 10,
                read_timeout: Duration::from_millis(50),
            },
        )
    }

    #[tokio::test]
    async fn test_starts_idle() {
        let ctrl = controller();
        assert_eq!(ctrl.state(), AxisState::Idle);
        assert_eq!(ctrl.last_position(), None);
    }

    #[tokio::test]
    async fn test_read_position_retries_then_fails() {
        let (port, mut device) = mock_serial::new();
        let mut chan = channel(port);
        let mut ctrl = controller();

        let task = tokio::spawn(async move {
            let result = ctrl.read_position(&mut chan).await;
            (ctrl, result)
        });
        for _ in 0..3 {
            device.expect_and_respond("r2", &["Move = 0"]).await;
        }

        let (ctrl, result) = task.await.unwrap();
        assert!(matches!(
            result,
            Err(StageError::PositionUnavailable { attempts: 3, .. })
        ));
        assert_eq!(ctrl.last_position(), None);
    }

    #[tokio::test]
    async fn test_configure_velocity() {
        let (port, mut device) = mock_serial::new();
        let mut chan = channel(port);
        let mut ctrl = controller();

        let task = tokio::spawn(async move { ctrl.configure_velocity(&mut chan, 100, 40).await });
        device.expect_and_respond("v2 100", &[]).await;
        device.expect_and_respond("vs2 40", &[]).await;
        task.await.unwrap().unwrap();
    }
}
