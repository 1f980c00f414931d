//! Soft-limit gate applied before any motion command reaches the wire.
//!
//! Three independent checks, evaluated in order:
//!
//! 1. **Range** (every axis): targets outside `[soft_min, soft_max]` need
//!    operator confirmation.
//! 2. **Sign reversal** (rotation only): a target whose sign differs from the
//!    last known position crosses the zero reference and needs confirmation.
//!    Skipped with a warning when the position is unknown.
//! 3. **Minimum travel** (rotation only): `|target|` below the configured
//!    threshold needs confirmation.
//!
//! The first declined check cancels the whole request; nothing is written.

use crate::axis::{Axis, AxisKind};
use crate::error::StageError;
use async_trait::async_trait;

/// Minimum rotation magnitude, in steps, accepted without confirmation.
pub const DEFAULT_MIN_ROTATION_TRAVEL_STEPS: i64 = 300;

/// Yes/no confirmation supplied by the calling shell.
#[async_trait]
pub trait Confirm: Send {
    /// Ask `question`; `true` only on an explicit affirmative answer.
    async fn confirm(&mut self, question: &str) -> bool;
}

/// Outcome of [`LimitGuard::validate`].
#[derive(Debug)]
pub enum Decision {
    /// Issue the move.
    Proceed,
    /// Do not touch the device. Carries the declined check as a limit-decline
    /// [`StageError`].
    Cancel(StageError),
}

impl Decision {
    /// True for [`Decision::Proceed`].
    pub fn is_proceed(&self) -> bool {
        matches!(self, Decision::Proceed)
    }
}

/// Soft-limit validator.
#[derive(Debug, Clone, Copy)]
pub struct LimitGuard {
    min_rotation_travel_steps: i64,
}

impl Default for LimitGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_ROTATION_TRAVEL_STEPS)
    }
}

impl LimitGuard {
    /// Create a guard with the given rotation minimum-travel threshold.
    pub fn new(min_rotation_travel_steps: i64) -> Self {
        Self {
            min_rotation_travel_steps,
        }
    }

    /// Rotation minimum-travel threshold in steps.
    pub fn min_rotation_travel_steps(&self) -> i64 {
        self.min_rotation_travel_steps
    }

    /// Validate `target` for `axis`, asking `confirm` for every check that
    /// trips.
    ///
    /// `last_known` is the axis position from the most recent settled poll,
    /// or `None` if it has never been read.
    #[tracing::instrument(skip(self, axis, confirm), fields(axis = %axis.name()))]
    pub async fn validate(
        &self,
        axis: &Axis,
        target: i64,
        last_known: Option<i64>,
        confirm: &mut dyn Confirm,
    ) -> Decision {
        if !axis.within_soft_range(target) {
            let question = format!(
                "Target {} is outside the {} soft range [{}, {}]. Proceed?",
                axis.describe(target),
                axis.name(),
                axis.soft_min(),
                axis.soft_max()
            );
            if !confirm.confirm(&question).await {
                return self.cancel(StageError::OutOfRange {
                    axis: axis.name().to_string(),
                    target,
                    min: axis.soft_min(),
                    max: axis.soft_max(),
                });
            }
        }

        if axis.kind() != AxisKind::Rotation {
            return Decision::Proceed;
        }

        match last_known {
            Some(current) if reverses_sign(current, target) => {
                let question = format!(
                    "Target {} has the opposite sign of the current {}. Proceed?",
                    axis.describe(target),
                    axis.describe(current)
                );
                if !confirm.confirm(&question).await {
                    return self.cancel(StageError::UnsafeDirection {
                        axis: axis.name().to_string(),
                        target,
                        current,
                    });
                }
            }
            Some(_) => {}
            None => {
                tracing::warn!(target, "Current rotation unknown; sign check skipped");
            }
        }

        let threshold = u64::try_from(self.min_rotation_travel_steps).unwrap_or(0);
        if target.unsigned_abs() < threshold {
            let question = format!(
                "Target {} is below the minimum travel of {} steps. Proceed?",
                axis.describe(target),
                self.min_rotation_travel_steps
            );
            if !confirm.confirm(&question).await {
                return self.cancel(StageError::BelowMinimumTravel {
                    axis: axis.name().to_string(),
                    target,
                    threshold: self.min_rotation_travel_steps,
                });
            }
        }

        Decision::Proceed
    }

    fn cancel(&self, reason: StageError) -> Decision {
        tracing::info!(%reason, "Motion request cancelled");
        Decision::Cancel(reason)
    }
}

// Zero on either side never counts as a reversal.
fn reverses_sign(current: i64, target: i64) -> bool {
    (current > 0 && target < 0) || (current < 0 && target > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Answers from a script and records every question asked.
    struct Scripted {
        answers: VecDeque<bool>,
        asked: Vec<String>,
    }

    impl Scripted {
        fn new(answers: &[bool]) -> Self {
            Self {
                answers: answers.iter().copied().collect(),
                asked: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl Confirm for Scripted {
        async fn confirm(&mut self, question: &str) -> bool {
            self.asked.push(question.to_string());
            self.answers.pop_front().unwrap_or(false)
        }
    }

    fn position() -> Axis {
        Axis::new("position", "2", AxisKind::Linear, 0.001, 0, 1300)
    }

    fn angle() -> Axis {
        Axis::new("angle", "1", AxisKind::Rotation, 0.05, -3600, 3600)
    }

    #[tokio::test]
    async fn test_in_range_proceeds_without_asking() {
        let mut confirm = Scripted::new(&[]);
        let decision = LimitGuard::default()
            .validate(&position(), 500, None, &mut confirm)
            .await;
        assert!(decision.is_proceed());
        assert!(confirm.asked.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_needs_confirmation() {
        let guard = LimitGuard::default();

        let mut declined = Scripted::new(&[false]);
        match guard.validate(&position(), 1500, Some(0), &mut declined).await {
            Decision::Cancel(StageError::OutOfRange { target, min, max, .. }) => {
                assert_eq!((target, min, max), (1500, 0, 1300));
            }
            other => panic!("expected OutOfRange cancel, got {other:?}"),
        }
        assert_eq!(declined.asked.len(), 1);

        let mut accepted = Scripted::new(&[true]);
        assert!(guard
            .validate(&position(), 1500, Some(0), &mut accepted)
            .await
            .is_proceed());
    }

    #[tokio::test]
    async fn test_rotation_sign_reversal() {
        let guard = LimitGuard::default();

        let mut declined = Scripted::new(&[false]);
        let decision = guard.validate(&angle(), -800, Some(400), &mut declined).await;
        assert!(matches!(
            decision,
            Decision::Cancel(StageError::UnsafeDirection { current: 400, target: -800, .. })
        ));

        // Same sign, above threshold: nothing to ask.
        let mut silent = Scripted::new(&[]);
        assert!(guard.validate(&angle(), 800, Some(400), &mut silent).await.is_proceed());
        assert!(silent.asked.is_empty());
    }

    #[tokio::test]
    async fn test_rotation_unknown_position_skips_sign_check() {
        let mut confirm = Scripted::new(&[]);
        let decision = LimitGuard::default()
            .validate(&angle(), -800, None, &mut confirm)
            .await;
        assert!(decision.is_proceed());
        assert!(confirm.asked.is_empty());
    }

    #[tokio::test]
    async fn test_rotation_minimum_travel() {
        let guard = LimitGuard::default();

        let mut declined = Scripted::new(&[false]);
        let decision = guard.validate(&angle(), 200, Some(100), &mut declined).await;
        assert!(matches!(
            decision,
            Decision::Cancel(StageError::BelowMinimumTravel { threshold: 300, .. })
        ));

        let mut at_threshold = Scripted::new(&[]);
        assert!(guard.validate(&angle(), 300, Some(100), &mut at_threshold).await.is_proceed());
    }

    #[tokio::test]
    async fn test_checks_are_independent() {
        // Out of range, reversing and small: three questions, all accepted.
        let narrow = Axis::new("angle", "1", AxisKind::Rotation, 0.05, 0, 3600);
        let mut confirm = Scripted::new(&[true, true, true]);
        let decision = LimitGuard::default()
            .validate(&narrow, -100, Some(500), &mut confirm)
            .await;
        assert!(decision.is_proceed());
        assert_eq!(confirm.asked.len(), 3);

        // Declining the second stops before the third is asked.
        let mut confirm = Scripted::new(&[true, false]);
        let decision = LimitGuard::default()
            .validate(&narrow, -100, Some(500), &mut confirm)
            .await;
        assert!(matches!(decision, Decision::Cancel(StageError::UnsafeDirection { .. })));
        assert_eq!(confirm.asked.len(), 2);
    }

    #[tokio::test]
    async fn test_linear_axis_ignores_rotation_checks() {
        let mut confirm = Scripted::new(&[]);
        assert!(LimitGuard::default()
            .validate(&position(), 5, Some(900), &mut confirm)
            .await
            .is_proceed());
    }

    #[tokio::test]
    async fn test_extreme_rotation_target_is_gated_without_overflow() {
        let mut confirm = Scripted::new(&[true]);
        let decision = LimitGuard::default()
            .validate(&angle(), i64::MIN, None, &mut confirm)
            .await;
        assert!(decision.is_proceed());
        // Only the range question: |i64::MIN| is far above the minimum.
        assert_eq!(confirm.asked.len(), 1);
    }
}
