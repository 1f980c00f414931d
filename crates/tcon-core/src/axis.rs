//! Axis data model.
//!
//! An [`Axis`] is built once from static configuration at session start and
//! stays immutable for the session. The wire protocol always speaks integer
//! steps; physical units are derived with `unit_per_step`.

use crate::error::{StageError, StageResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of motion an axis performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisKind {
    /// Linear translation, physical unit millimetres.
    Linear,
    /// Rotation, physical unit degrees.
    Rotation,
}

impl AxisKind {
    /// Physical unit label.
    pub fn unit(&self) -> &'static str {
        match self {
            AxisKind::Linear => "mm",
            AxisKind::Rotation => "deg",
        }
    }
}

/// One physically controlled degree of freedom.
#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    name: String,
    id: String,
    kind: AxisKind,
    unit_per_step: f64,
    soft_min: i64,
    soft_max: i64,
}

impl Axis {
    /// Create an axis.
    ///
    /// `id` is the identifier used on the wire and may be empty for
    /// single-axis controllers. Bounds are inclusive and in steps.
    pub fn new(
        name: impl Into<String>,
        id: impl Into<String>,
        kind: AxisKind,
        unit_per_step: f64,
        soft_min: i64,
        soft_max: i64,
    ) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            kind,
            unit_per_step,
            soft_min,
            soft_max,
        }
    }

    /// Human-facing name ("position", "angle").
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wire-protocol identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Axis kind.
    pub fn kind(&self) -> AxisKind {
        self.kind
    }

    /// Physical units per device step.
    pub fn unit_per_step(&self) -> f64 {
        self.unit_per_step
    }

    /// Inclusive lower soft bound in steps.
    pub fn soft_min(&self) -> i64 {
        self.soft_min
    }

    /// Inclusive upper soft bound in steps.
    pub fn soft_max(&self) -> i64 {
        self.soft_max
    }

    /// True when `steps` lies inside the soft range.
    pub fn within_soft_range(&self, steps: i64) -> bool {
        (self.soft_min..=self.soft_max).contains(&steps)
    }

    /// Convert device steps to physical units.
    pub fn to_physical(&self, steps: i64) -> f64 {
        steps as f64 * self.unit_per_step
    }

    /// Convert physical units to the nearest device step.
    ///
    /// # Errors
    /// [`StageError::InvalidArgument`] when the step count is not finite or
    /// does not fit in an `i64`.
    pub fn to_steps(&self, physical: f64) -> StageResult<i64> {
        let steps = (physical / self.unit_per_step).round();
        // i64::MAX as f64 rounds up to 2^63, which is itself out of range.
        if !steps.is_finite() || steps < i64::MIN as f64 || steps >= i64::MAX as f64 {
            return Err(StageError::InvalidArgument(format!(
                "{} {} {} is beyond the representable step range",
                self.name,
                physical,
                self.kind.unit()
            )));
        }
        Ok(steps as i64)
    }

    /// Render a step count with its physical equivalent, e.g.
    /// `+40.00 deg (800 steps)`.
    pub fn describe(&self, steps: i64) -> String {
        let physical = self.to_physical(steps);
        match self.kind {
            AxisKind::Rotation => format!("{:+.2} {} ({} steps)", physical, self.kind.unit(), steps),
            AxisKind::Linear => format!("{} steps ({:.3} {})", steps, physical, self.kind.unit()),
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.id.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} (axis {})", self.name, self.id)
        }
    }
}
