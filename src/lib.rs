//! # tcon
//!
//! Operator-side library for the tcon stage controller. The protocol engine
//! lives in `tcon-driver` and the shared types in `tcon-core`; this crate adds
//! everything a session needs around them.
//!
//! ## Crate Structure
//!
//! - **`config`**: layered `Settings` (defaults, TOML file, `TCON_` environment)
//! - **`logging`**: tracing subscriber setup
//! - **`journal`**: best-effort command log and recall history
//! - **`dispatcher`**: `CommandDispatcher`, the one entry point for operator commands
//! - **`shell`**: line-oriented console that drives the dispatcher and answers
//!   limit confirmations

pub mod config;
pub mod dispatcher;
pub mod journal;
pub mod logging;
pub mod shell;

pub use config::Settings;
pub use dispatcher::{Command, CommandDispatcher, CommandOutcome};
pub use journal::Journal;
