//! Field extraction from controller response lines.
//!
//! The grammar is small and fixed. A line is split into segments on `,` and
//! `;`; a segment of the form `<key> = <value>` is a field when `<key>` is
//! exactly `Move` or exactly `PC<axis>`. The key is the last word before the
//! `=`, so banner text in front of a field is tolerated, and `PC21` never
//! matches axis `2`. Anything else is ignored.

use crate::protocol::DEFAULT_ERROR_TOKEN;

const MOVE_KEY: &str = "Move";
const POSITION_PREFIX: &str = "PC";

/// Fields found on a single line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParsedLine {
    /// `Move = <digit>`, nonzero meaning in motion.
    pub moving: Option<bool>,
    /// `PC<axis> = <signed int>` for this parser's axis.
    pub position: Option<i64>,
    /// Line contains the controller's error token.
    pub is_syntax_error: bool,
}

/// Decoded result of one response block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Last `Move` value in the block, if any.
    pub moving: Option<bool>,
    /// Last position value for the axis in the block, if any.
    pub position_steps: Option<i64>,
    /// Any line carried the error token.
    pub syntax_error: bool,
    /// First line that carried the error token.
    pub error_line: Option<String>,
}

/// Parser bound to one axis id.
#[derive(Debug, Clone)]
pub struct ResponseParser {
    position_key: String,
    error_token: String,
}

impl ResponseParser {
    /// Parser for `axis_id` using the default error token.
    pub fn new(axis_id: &str) -> Self {
        Self::with_error_token(axis_id, DEFAULT_ERROR_TOKEN)
    }

    /// Parser for `axis_id` with a custom error token (matched
    /// case-insensitively).
    pub fn with_error_token(axis_id: &str, error_token: &str) -> Self {
        Self {
            position_key: format!("{}{}", POSITION_PREFIX, axis_id),
            error_token: error_token.to_ascii_lowercase(),
        }
    }

    /// Parse one line. Unmatched text yields an all-unset result.
    pub fn parse(&self, line: &str) -> ParsedLine {
        let mut parsed = ParsedLine {
            is_syntax_error: !self.error_token.is_empty()
                && line.to_ascii_lowercase().contains(&self.error_token),
            ..ParsedLine::default()
        };

        for segment in line.split([',', ';']) {
            let Some((lhs, rhs)) = segment.split_once('=') else {
                continue;
            };
            let Some(key) = lhs.split_whitespace().last() else {
                continue;
            };
            let Some(value) = rhs.split_whitespace().next() else {
                continue;
            };

            if key == MOVE_KEY {
                if let Ok(flag) = value.parse::<u8>() {
                    parsed.moving = Some(flag != 0);
                }
            } else if key == self.position_key {
                if let Ok(steps) = value.parse::<i64>() {
                    parsed.position = Some(steps);
                }
            }
        }

        parsed
    }

    /// Fold a whole block into one status. Later fields win.
    pub fn parse_block<S: AsRef<str>>(&self, lines: &[S]) -> DeviceStatus {
        lines
            .iter()
            .fold(DeviceStatus::default(), |mut status, line| {
                let line = line.as_ref();
                let parsed = self.parse(line);
                if parsed.moving.is_some() {
                    status.moving = parsed.moving;
                }
                if parsed.position.is_some() {
                    status.position_steps = parsed.position;
                }
                if parsed.is_syntax_error {
                    status.syntax_error = true;
                    status.error_line.get_or_insert_with(|| line.to_string());
                }
                status
            })
    }
}
