//! `tcon-core`
//!
//! Shared building blocks for the tcon stage controller.
//!
//! ## Key Types
//!
//! - [`StageError`]: the error taxonomy surfaced to the operator
//! - [`Axis`]: one configured degree of freedom, in device steps
//! - [`InstanceLock`]: single-process ownership of the physical link
//! - [`LimitGuard`]: soft-limit gate with operator confirmation via [`Confirm`]
//! - [`serial::DynSerial`]: the boxed duplex byte stream every driver talks to
//!
//! The [`mock_serial`] module provides a scripted device for tests.

pub mod axis;
pub mod error;
pub mod limits;
pub mod lock;
pub mod mock_serial;
pub mod serial;

pub use axis::{Axis, AxisKind};
pub use error::{StageError, StageResult};
pub use limits::{Confirm, Decision, LimitGuard, DEFAULT_MIN_ROTATION_TRAVEL_STEPS};
pub use lock::{InstanceLock, LockStatus};
pub use serial::{DynSerial, SerialPortIO};
