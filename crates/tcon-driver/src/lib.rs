//! `tcon-driver`
//!
//! Protocol engine for line-oriented stepper-motor controllers.
//!
//! - [`protocol`]: command encoding
//! - [`channel::LineChannel`]: CR-LF framing with bounded block reads
//! - [`response::ResponseParser`]: `Move` / `PC<axis>` field extraction
//! - [`controller::AxisController`]: move, reference return and settle polling
//!
//! All operations take the channel by `&mut`, so commands on one link are
//! strictly sequential.

pub mod channel;
pub mod controller;
pub mod protocol;
pub mod response;

pub use channel::{BlockLimits, LineChannel, ReadBlockError};
pub use controller::{AxisController, AxisState, MotionOutcome, PollTiming};
pub use response::{DeviceStatus, ParsedLine, ResponseParser};
