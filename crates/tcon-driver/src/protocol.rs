//! Command encoding for the line-oriented stepper controller.
//!
//! Every command is one ASCII line; [`LineChannel`](crate::channel::LineChannel)
//! appends the CR-LF terminator. Axis ids are opaque strings and may be empty
//! on single-axis controllers.
//!
//! | Command              | Meaning                                  |
//! |----------------------|------------------------------------------|
//! | `d<axis> <steps>`    | set absolute target                      |
//! | `abs<axis>`          | execute the stored target                |
//! | `rtncr<axis>`        | return to hardware reference             |
//! | `r<axis>`            | status query                             |
//! | `v<axis> <n>`        | velocity                                 |
//! | `vs<axis> <n>`       | start velocity                           |
//! | `s`                  | stop all axes                            |

/// Line terminator written after every command.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Error token the controller echoes for a rejected command.
pub const DEFAULT_ERROR_TOKEN: &str = "Syntax error";

/// `d<axis> <steps>`
pub fn set_target(axis_id: &str, steps: i64) -> String {
    format!("d{} {}", axis_id, steps)
}

/// `abs<axis>`
pub fn execute_absolute(axis_id: &str) -> String {
    format!("abs{}", axis_id)
}

/// `rtncr<axis>`
pub fn return_to_reference(axis_id: &str) -> String {
    format!("rtncr{}", axis_id)
}

/// `r<axis>`
pub fn status_query(axis_id: &str) -> String {
    format!("r{}", axis_id)
}

/// `v<axis> <velocity>`
pub fn velocity(axis_id: &str, velocity: u32) -> String {
    format!("v{} {}", axis_id, velocity)
}

/// `vs<axis> <velocity>`
pub fn start_velocity(axis_id: &str, velocity: u32) -> String {
    format!("vs{} {}", axis_id, velocity)
}

/// `s`
pub fn stop() -> String {
    "s".to_string()
}
