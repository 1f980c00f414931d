//! Configuration for the stage controller.
//!
//! Layered with Figment:
//! 1. Base layer: hardcoded defaults from `Settings::default()`
//! 2. File layer: `tcon.toml` or the `--config` path (optional)
//! 3. Environment layer: variables prefixed `TCON_`, nested with `__`
//! 4. Command-line overrides, applied by the binary after extraction
//!
//! # Environment Variables
//!
//! - `TCON_LOG_LEVEL=debug` → `log_level`
//! - `TCON_SERIAL__PORT=/dev/ttyUSB1` → `serial.port`
//! - `TCON_AXES__POSITION__SOFT_MAX=1500` → `axes.position.soft_max`

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tcon_core::{Axis, AxisKind};
use tcon_driver::{BlockLimits, PollTiming};

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tcon.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "TCON_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Upper bound on `protocol.block_timeout_ms` (10 minutes).
pub const MAX_BLOCK_TIMEOUT_MS: u64 = 600_000;

/// Upper bound on `protocol.motion_timeout_secs` (one day).
pub const MAX_MOTION_TIMEOUT_SECS: u64 = 86_400;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored.
    Pretty,
    /// Single-line, no colors.
    Compact,
    /// One JSON object per event.
    Json,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Logging verbosity: "error", "warn", "info", "debug" or "trace".
    /// `RUST_LOG` takes precedence when set.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// Serial link.
    pub serial: SerialSettings,
    /// Response framing and polling.
    pub protocol: ProtocolSettings,
    /// Single-instance lock.
    pub lock: LockSettings,
    /// Command log and history.
    pub journal: JournalSettings,
    /// Rotation safety thresholds.
    pub limits: LimitSettings,
    /// Axis definitions.
    pub axes: AxesSettings,
    /// Named target positions, e.g. `[presets.tSi0]`.
    #[serde(default)]
    pub presets: BTreeMap<String, PresetSettings>,
}

/// Serial port settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Device path.
    pub port: String,
    /// Baud rate (8N1, no flow control).
    pub baud_rate: u32,
    /// Length of one read cycle in milliseconds.
    pub read_timeout_ms: u64,
}

/// Protocol timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolSettings {
    /// Wall-clock bound for one response block.
    pub block_timeout_ms: u64,
    /// Consecutive empty read cycles tolerated within a block.
    pub max_empty_reads: u32,
    /// Pause between status polls while an axis moves.
    pub settle_delay_ms: u64,
    /// Bound on a whole poll loop.
    pub motion_timeout_secs: u64,
    /// Extra status queries when an axis settles without a position.
    pub position_retries: u32,
    /// Text the controller echoes for a rejected command.
    pub error_token: String,
}

/// Lock settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockSettings {
    /// Lock file path.
    pub path: PathBuf,
}

/// Journal settings. Missing paths resolve under the home directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalSettings {
    /// Write command log and history at all.
    pub enabled: bool,
    /// Append-only command log; default `~/.tcon.log`.
    pub log_file: Option<PathBuf>,
    /// Recall history; default `~/.tcon.history`.
    pub history_file: Option<PathBuf>,
    /// Entries kept in the history file.
    pub history_limit: usize,
}

/// Rotation thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitSettings {
    /// `|target|` below this many steps needs confirmation on a rotation axis.
    pub min_rotation_travel_steps: i64,
}

/// The two axes of the stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxesSettings {
    /// Linear target position.
    pub position: AxisSettings,
    /// Target rotation.
    pub angle: AxisSettings,
}

/// One axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisSettings {
    /// Wire id; may be empty on a single-axis controller.
    pub id: String,
    /// Physical units (mm or deg) per step.
    pub unit_per_step: f64,
    /// Inclusive lower soft bound in steps.
    pub soft_min: i64,
    /// Inclusive upper soft bound in steps.
    pub soft_max: i64,
    /// Velocity sent at session start.
    pub velocity: u32,
    /// Start velocity sent at session start.
    pub start_velocity: u32,
}

/// Axis a preset drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresetAxis {
    /// The linear position axis.
    Position,
    /// The rotation axis.
    Angle,
}

/// One named target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetSettings {
    /// Axis to move.
    pub axis: PresetAxis,
    /// Absolute target in steps.
    pub steps: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            serial: SerialSettings {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: 9600,
                read_timeout_ms: 250,
            },
            protocol: ProtocolSettings {
                block_timeout_ms: 5000,
                max_empty_reads: 20,
                settle_delay_ms: 1000,
                motion_timeout_secs: 300,
                position_retries: 3,
                error_token: tcon_driver::protocol::DEFAULT_ERROR_TOKEN.to_string(),
            },
            lock: LockSettings {
                path: PathBuf::from("/tmp/tcon.lock"),
            },
            journal: JournalSettings {
                enabled: true,
                log_file: None,
                history_file: None,
                history_limit: 1000,
            },
            limits: LimitSettings {
                min_rotation_travel_steps: tcon_core::DEFAULT_MIN_ROTATION_TRAVEL_STEPS,
            },
            axes: AxesSettings {
                position: AxisSettings {
                    id: "2".to_string(),
                    unit_per_step: 0.001,
                    soft_min: 0,
                    soft_max: 1300,
                    velocity: 100,
                    start_velocity: 100,
                },
                angle: AxisSettings {
                    id: "1".to_string(),
                    unit_per_step: 0.05,
                    soft_min: -3600,
                    soft_max: 3600,
                    velocity: 100,
                    start_velocity: 100,
                },
            },
            presets: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Layer defaults, the optional TOML file and `TCON_` variables, then
    /// validate.
    ///
    /// `config_path` of `None` means [`DEFAULT_CONFIG_FILE`], which may be
    /// absent. An explicit path must exist.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let file_path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if file_path.exists() {
            figment = figment.merge(Toml::file(file_path));
        } else if config_path.is_some() {
            anyhow::bail!("Config file not found: {}", file_path.display());
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let settings: Settings = figment
            .extract()
            .context("Failed to extract configuration")?;
        settings
            .validate()
            .context("Configuration validation failed")?;
        Ok(settings)
    }

    /// Semantic checks the type system cannot express.
    pub fn validate(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                VALID_LOG_LEVELS.join(", ")
            );
        }

        if self.serial.port.trim().is_empty() {
            anyhow::bail!("serial.port cannot be empty");
        }
        if self.serial.baud_rate == 0 {
            anyhow::bail!("serial.baud_rate must be positive");
        }
        if self.serial.read_timeout_ms == 0 {
            anyhow::bail!("serial.read_timeout_ms must be positive");
        }

        let p = &self.protocol;
        if p.block_timeout_ms == 0 || p.settle_delay_ms == 0 || p.motion_timeout_secs == 0 {
            anyhow::bail!("protocol timeouts and settle delay must be positive");
        }
        if p.block_timeout_ms > MAX_BLOCK_TIMEOUT_MS {
            anyhow::bail!(
                "protocol.block_timeout_ms {} exceeds {}",
                p.block_timeout_ms,
                MAX_BLOCK_TIMEOUT_MS
            );
        }
        if p.motion_timeout_secs > MAX_MOTION_TIMEOUT_SECS {
            anyhow::bail!(
                "protocol.motion_timeout_secs {} exceeds {}",
                p.motion_timeout_secs,
                MAX_MOTION_TIMEOUT_SECS
            );
        }
        if p.max_empty_reads == 0 {
            anyhow::bail!("protocol.max_empty_reads must be at least 1");
        }
        if p.error_token.trim().is_empty() {
            anyhow::bail!("protocol.error_token cannot be empty");
        }

        if self.limits.min_rotation_travel_steps < 0 {
            anyhow::bail!("limits.min_rotation_travel_steps cannot be negative");
        }

        for (name, axis) in [("position", &self.axes.position), ("angle", &self.axes.angle)] {
            axis.validate().with_context(|| format!("axes.{name}"))?;
        }
        if self.axes.position.id == self.axes.angle.id {
            anyhow::bail!("Duplicate axis id: '{}'", self.axes.position.id);
        }

        for name in self.presets.keys() {
            if name.is_empty() || name.chars().any(char::is_whitespace) {
                anyhow::bail!("Preset name '{}' must be one word", name);
            }
        }

        Ok(())
    }

    /// Read-cycle, block and empty-read bounds for the line channel.
    pub fn block_limits(&self) -> BlockLimits {
        BlockLimits {
            overall_timeout: Duration::from_millis(self.protocol.block_timeout_ms),
            max_empty_reads: self.protocol.max_empty_reads,
            read_timeout: Duration::from_millis(self.serial.read_timeout_ms),
        }
    }

    /// Poll-loop timing for every axis.
    pub fn poll_timing(&self) -> PollTiming {
        PollTiming {
            settle_delay: Duration::from_millis(self.protocol.settle_delay_ms),
            motion_timeout: Duration::from_secs(self.protocol.motion_timeout_secs),
            position_retries: self.protocol.position_retries,
        }
    }

    /// The linear position axis.
    pub fn position_axis(&self) -> Axis {
        self.axes.position.to_axis("position", AxisKind::Linear)
    }

    /// The rotation axis.
    pub fn angle_axis(&self) -> Axis {
        self.axes.angle.to_axis("angle", AxisKind::Rotation)
    }
}

impl AxisSettings {
    fn validate(&self) -> Result<()> {
        if !(self.unit_per_step.is_finite() && self.unit_per_step > 0.0) {
            anyhow::bail!("unit_per_step must be a positive number");
        }
        if self.soft_min > self.soft_max {
            anyhow::bail!(
                "soft_min {} exceeds soft_max {}",
                self.soft_min,
                self.soft_max
            );
        }
        if self.id.chars().any(char::is_whitespace) {
            anyhow::bail!("id '{}' contains whitespace", self.id);
        }
        Ok(())
    }

    fn to_axis(&self, name: &str, kind: AxisKind) -> Axis {
        Axis::new(
            name,
            self.id.clone(),
            kind,
            self.unit_per_step,
            self.soft_min,
            self.soft_max,
        )
    }
}

impl JournalSettings {
    /// Command log path, if one can be determined.
    pub fn resolved_log_file(&self) -> Option<PathBuf> {
        self.log_file
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".tcon.log")))
    }

    /// History path, if one can be determined.
    pub fn resolved_history_file(&self) -> Option<PathBuf> {
        self.history_file
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".tcon.history")))
    }
}
