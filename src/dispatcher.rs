//! Command dispatch: the single entry point the shell talks to.
//!
//! A command line is parsed into a [`Command`], motion targets pass through
//! the [`LimitGuard`], and the matching [`AxisController`] operation runs over
//! the one [`LineChannel`] this dispatcher owns. Every call returns a
//! human-readable outcome.

use crate::config::{PresetAxis, PresetSettings, Settings};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tcon_core::serial::open_serial_exclusive;
use tcon_core::{Axis, Confirm, Decision, LimitGuard, StageError, StageResult};
use tcon_driver::{protocol, AxisController, LineChannel};
use tracing::instrument;

const STALE_INPUT_WINDOW: Duration = Duration::from_millis(50);

/// Supported command tokens, for help output.
pub const COMMANDS: [(&str, &str); 10] = [
    ("goto-position <steps>", "absolute move of the position axis"),
    ("goto-angle <degrees>", "absolute move of the angle axis"),
    ("goto-preset <name>", "move to a named target from the configuration"),
    ("presets", "list the named targets"),
    ("reset-position", "return the position axis to its reference"),
    ("reset-angle", "return the angle axis to its reference"),
    ("read-position", "query the position axis"),
    ("read-angle", "query the angle axis"),
    ("stop", "stop all axes"),
    ("status", "last known positions, without querying"),
];

/// Which configured axis an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisSelector {
    /// Linear position axis.
    Position,
    /// Rotation axis.
    Angle,
}

impl From<PresetAxis> for AxisSelector {
    fn from(axis: PresetAxis) -> Self {
        match axis {
            PresetAxis::Position => AxisSelector::Position,
            PresetAxis::Angle => AxisSelector::Angle,
        }
    }
}

/// One parsed operator command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `goto-position <steps>`
    GotoPosition(i64),
    /// `goto-angle <degrees>`
    GotoAngle(f64),
    /// `goto-preset <name>`
    GotoPreset(String),
    /// `presets`
    Presets,
    /// `reset-position`
    ResetPosition,
    /// `reset-angle`
    ResetAngle,
    /// `read-position`
    ReadPosition,
    /// `read-angle`
    ReadAngle,
    /// `stop`
    Stop,
    /// `status`
    Status,
}

impl FromStr for Command {
    type Err = StageError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let token = words
            .next()
            .ok_or_else(|| StageError::UnknownCommand(String::new()))?;
        let args: Vec<&str> = words.collect();

        let command = match token {
            "goto-position" => Command::GotoPosition(single_arg(token, &args)?),
            "goto-angle" => {
                let degrees: f64 = single_arg(token, &args)?;
                if !degrees.is_finite() {
                    return Err(StageError::InvalidArgument(format!(
                        "{token}: angle must be finite"
                    )));
                }
                Command::GotoAngle(degrees)
            }
            "goto-preset" => Command::GotoPreset(single_arg(token, &args)?),
            "presets" => no_args(token, &args, Command::Presets)?,
            "reset-position" => no_args(token, &args, Command::ResetPosition)?,
            "reset-angle" => no_args(token, &args, Command::ResetAngle)?,
            "read-position" => no_args(token, &args, Command::ReadPosition)?,
            "read-angle" => no_args(token, &args, Command::ReadAngle)?,
            "stop" => no_args(token, &args, Command::Stop)?,
            "status" => no_args(token, &args, Command::Status)?,
            other => return Err(StageError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }
}

fn single_arg<T: FromStr>(token: &str, args: &[&str]) -> StageResult<T> {
    match args {
        [value] => value.parse().map_err(|_| {
            StageError::InvalidArgument(format!("{token}: cannot parse '{value}'"))
        }),
        _ => Err(StageError::InvalidArgument(format!(
            "{token} takes exactly one argument"
        ))),
    }
}

fn no_args(token: &str, args: &[&str], command: Command) -> StageResult<Command> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err(StageError::InvalidArgument(format!(
            "{token} takes no arguments"
        )))
    }
}

/// Result of a dispatched command that did not fail.
#[derive(Debug)]
pub enum CommandOutcome {
    /// The command ran; carries the status text.
    Done(String),
    /// A limit check was declined; nothing was written to the device.
    Cancelled(StageError),
}

impl CommandOutcome {
    /// True for [`CommandOutcome::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CommandOutcome::Cancelled(_))
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutcome::Done(message) => f.write_str(message),
            CommandOutcome::Cancelled(reason) => write!(f, "cancelled: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Velocities {
    velocity: u32,
    start_velocity: u32,
}

/// Owner of the transport and both axis controllers.
#[derive(Debug)]
pub struct CommandDispatcher {
    channel: LineChannel,
    position: AxisController,
    angle: AxisController,
    position_velocities: Velocities,
    angle_velocities: Velocities,
    guard: LimitGuard,
    presets: BTreeMap<String, PresetSettings>,
}

impl CommandDispatcher {
    /// Build a dispatcher over an already opened channel.
    pub fn new(channel: LineChannel, settings: &Settings) -> Self {
        let timing = settings.poll_timing();
        let token = &settings.protocol.error_token;
        Self {
            channel,
            position: AxisController::new(settings.position_axis(), timing, token),
            angle: AxisController::new(settings.angle_axis(), timing, token),
            position_velocities: Velocities {
                velocity: settings.axes.position.velocity,
                start_velocity: settings.axes.position.start_velocity,
            },
            angle_velocities: Velocities {
                velocity: settings.axes.angle.velocity,
                start_velocity: settings.axes.angle.start_velocity,
            },
            guard: LimitGuard::new(settings.limits.min_rotation_travel_steps),
            presets: settings.presets.clone(),
        }
    }

    /// Open the configured serial port with exclusive access.
    ///
    /// # Errors
    /// [`StageError::TransportUnavailable`] if the port is missing or busy.
    pub async fn open(settings: &Settings) -> StageResult<Self> {
        let stream = open_serial_exclusive(
            &settings.serial.port,
            settings.serial.baud_rate,
            "stage controller",
        )
        .await?;
        let channel = LineChannel::new(Box::new(stream), settings.block_limits());
        Ok(Self::new(channel, settings))
    }

    /// Session start: velocities for every axis, then one position read each.
    ///
    /// A failed position read leaves that axis unknown.
    #[instrument(skip(self), err)]
    pub async fn initialize(&mut self) -> StageResult<()> {
        self.channel.discard_stale_input(STALE_INPUT_WINDOW).await;

        for selector in [AxisSelector::Position, AxisSelector::Angle] {
            let velocities = match selector {
                AxisSelector::Position => self.position_velocities,
                AxisSelector::Angle => self.angle_velocities,
            };
            let (controller, channel) = self.split(selector);
            controller
                .configure_velocity(channel, velocities.velocity, velocities.start_velocity)
                .await?;
        }

        for selector in [AxisSelector::Position, AxisSelector::Angle] {
            let (controller, channel) = self.split(selector);
            match controller.read_position(channel).await {
                Ok(steps) => {
                    tracing::info!(axis = %controller.axis(), steps, "Initial position");
                }
                Err(e) => {
                    tracing::warn!(axis = %controller.axis(), error = %e, "Initial position unknown");
                }
            }
        }
        Ok(())
    }

    /// Parse and run one command line.
    pub async fn execute(
        &mut self,
        line: &str,
        confirm: &mut dyn Confirm,
    ) -> StageResult<CommandOutcome> {
        let command: Command = line.parse()?;
        self.run(command, confirm).await
    }

    /// Run a parsed command.
    #[instrument(skip(self, confirm), err)]
    pub async fn run(
        &mut self,
        command: Command,
        confirm: &mut dyn Confirm,
    ) -> StageResult<CommandOutcome> {
        match command {
            Command::GotoPosition(steps) => self.goto(AxisSelector::Position, steps, confirm).await,
            Command::GotoAngle(degrees) => {
                let steps = self.angle.axis().to_steps(degrees)?;
                self.goto(AxisSelector::Angle, steps, confirm).await
            }
            Command::GotoPreset(name) => self.goto_preset(&name, confirm).await,
            Command::Presets => Ok(CommandOutcome::Done(self.list_presets())),
            Command::ResetPosition => self.reset(AxisSelector::Position).await,
            Command::ResetAngle => self.reset(AxisSelector::Angle).await,
            Command::ReadPosition => self.read(AxisSelector::Position).await,
            Command::ReadAngle => self.read(AxisSelector::Angle).await,
            Command::Stop => self.stop().await,
            Command::Status => Ok(CommandOutcome::Done(self.status())),
        }
    }

    /// Validate `target`, then move and wait for the axis to settle.
    pub async fn goto(
        &mut self,
        selector: AxisSelector,
        target: i64,
        confirm: &mut dyn Confirm,
    ) -> StageResult<CommandOutcome> {
        let guard = self.guard;
        let (controller, channel) = self.split(selector);
        let decision = guard
            .validate(controller.axis(), target, controller.last_position(), confirm)
            .await;
        if let Decision::Cancel(reason) = decision {
            return Ok(CommandOutcome::Cancelled(reason));
        }

        let outcome = controller.move_to(channel, target).await?;
        Ok(CommandOutcome::Done(format!(
            "{} at {}",
            controller.axis().name(),
            controller.axis().describe(outcome.position_steps)
        )))
    }

    /// Move to a named target; same checks as an explicit move.
    pub async fn goto_preset(
        &mut self,
        name: &str,
        confirm: &mut dyn Confirm,
    ) -> StageResult<CommandOutcome> {
        let preset = self
            .presets
            .get(name)
            .cloned()
            .ok_or_else(|| StageError::InvalidArgument(format!("no preset named '{name}'")))?;
        tracing::info!(name, steps = preset.steps, "Preset selected");
        self.goto(preset.axis.into(), preset.steps, confirm).await
    }

    fn list_presets(&self) -> String {
        if self.presets.is_empty() {
            return "no presets configured".to_string();
        }
        self.presets
            .iter()
            .map(|(name, preset)| {
                let axis = self.controller(preset.axis.into()).axis();
                format!("{name}: {} {}", axis.name(), axis.describe(preset.steps))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Return an axis to its hardware reference.
    pub async fn reset(&mut self, selector: AxisSelector) -> StageResult<CommandOutcome> {
        let (controller, channel) = self.split(selector);
        let outcome = controller.reset_to_reference(channel).await?;
        Ok(CommandOutcome::Done(format!(
            "{} referenced at {}",
            controller.axis().name(),
            controller.axis().describe(outcome.position_steps)
        )))
    }

    /// Query an axis position.
    pub async fn read(&mut self, selector: AxisSelector) -> StageResult<CommandOutcome> {
        let (controller, channel) = self.split(selector);
        let steps = controller.read_position(channel).await?;
        Ok(CommandOutcome::Done(format!(
            "{} at {}",
            controller.axis().name(),
            controller.axis().describe(steps)
        )))
    }

    /// Send the all-axis stop.
    pub async fn stop(&mut self) -> StageResult<CommandOutcome> {
        let lines = self.channel.transact(&protocol::stop()).await?;
        tracing::info!(?lines, "Stop acknowledged");
        Ok(CommandOutcome::Done("stop sent".to_string()))
    }

    /// Last known position of every axis, without device traffic.
    pub fn status(&self) -> String {
        [&self.position, &self.angle]
            .iter()
            .map(|controller| {
                let axis: &Axis = controller.axis();
                match controller.last_position() {
                    Some(steps) => format!("{}: {}", axis, axis.describe(steps)),
                    None => format!("{}: unknown", axis),
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Controller for `selector`.
    pub fn controller(&self, selector: AxisSelector) -> &AxisController {
        match selector {
            AxisSelector::Position => &self.position,
            AxisSelector::Angle => &self.angle,
        }
    }

    /// Close the transport.
    pub async fn close(&mut self) {
        self.channel.close().await;
    }

    fn split(&mut self, selector: AxisSelector) -> (&mut AxisController, &mut LineChannel) {
        match selector {
            AxisSelector::Position => (&mut self.position, &mut self.channel),
            AxisSelector::Angle => (&mut self.angle, &mut self.channel),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "goto-position 800".parse::<Command>().unwrap(),
            Command::GotoPosition(800)
        );
        assert_eq!(
            "  goto-angle   -12.5 ".parse::<Command>().unwrap(),
            Command::GotoAngle(-12.5)
        );
        assert_eq!(
            "goto-angle +40".parse::<Command>().unwrap(),
            Command::GotoAngle(40.0)
        );
        assert_eq!("stop".parse::<Command>().unwrap(), Command::Stop);
        assert_eq!(
            "goto-preset tSi1".parse::<Command>().unwrap(),
            Command::GotoPreset("tSi1".to_string())
        );
        assert_eq!("presets".parse::<Command>().unwrap(), Command::Presets);
        assert_eq!("status".parse::<Command>().unwrap(), Command::Status);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "fly 3".parse::<Command>(),
            Err(StageError::UnknownCommand(token)) if token == "fly"
        ));
        assert!(matches!(
            "goto-position".parse::<Command>(),
            Err(StageError::InvalidArgument(_))
        ));
        assert!(matches!(
            "goto-position 1.5".parse::<Command>(),
            Err(StageError::InvalidArgument(_))
        ));
        assert!(matches!(
            "goto-angle inf".parse::<Command>(),
            Err(StageError::InvalidArgument(_))
        ));
        assert!(matches!(
            "goto-preset".parse::<Command>(),
            Err(StageError::InvalidArgument(_))
        ));
        assert!(matches!(
            "read-angle now".parse::<Command>(),
            Err(StageError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_outcome_display() {
        let cancelled = CommandOutcome::Cancelled(StageError::OutOfRange {
            axis: "position".into(),
            target: 2000,
            min: 0,
            max: 1300,
        });
        assert!(cancelled.is_cancelled());
        assert!(cancelled.to_string().starts_with("cancelled: "));
        assert_eq!(CommandOutcome::Done("ok".into()).to_string(), "ok");
    }
}
