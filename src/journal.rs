//! Non-critical command log and recall history.
//!
//! Two flat files, both best-effort: any I/O failure is logged at `warn` and
//! dropped, never reaching device control.
//!
//! - command log: one `[YYYY-MM-DD HH:MM:SS] <command>` line per command, UTC,
//!   append-only
//! - history: one command per line, capped at `history_limit`, rewritten on
//!   [`Journal::persist`]

use crate::config::JournalSettings;
use chrono::Utc;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Command log and history for one session.
#[derive(Debug, Default)]
pub struct Journal {
    log_file: Option<PathBuf>,
    history_file: Option<PathBuf>,
    history: Vec<String>,
    limit: usize,
}

impl Journal {
    /// Open the journal described by `settings`, loading existing history.
    pub fn open(settings: &JournalSettings) -> Self {
        if !settings.enabled {
            return Self::disabled();
        }
        let mut journal = Self {
            log_file: settings.resolved_log_file(),
            history_file: settings.resolved_history_file(),
            history: Vec::new(),
            limit: settings.history_limit,
        };
        if let Some(path) = journal.history_file.clone() {
            match std::fs::read_to_string(&path) {
                Ok(text) => {
                    journal.history = text
                        .lines()
                        .filter(|line| !line.trim().is_empty())
                        .map(str::to_string)
                        .collect();
                    journal.trim();
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => non_critical("load history", &path, e),
            }
        }
        journal
    }

    /// A journal that records history in memory only.
    pub fn disabled() -> Self {
        Self {
            limit: usize::MAX,
            ..Self::default()
        }
    }

    /// Record one command in the log and the history.
    pub fn record(&mut self, command: &str) {
        let command = command.trim();
        if command.is_empty() {
            return;
        }
        if let Some(path) = &self.log_file {
            if let Err(e) = append_log_line(path, command) {
                non_critical("append command log", path, e);
            }
        }
        self.history.push(command.to_string());
        self.trim();
    }

    /// History entries, oldest first.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Entry `n`, counting from 1 as listed by the `history` command.
    pub fn recall(&self, n: usize) -> Option<&str> {
        n.checked_sub(1)
            .and_then(|i| self.history.get(i))
            .map(String::as_str)
    }

    /// Rewrite the history file.
    pub fn persist(&self) {
        if let Some(path) = &self.history_file {
            let mut text = self.history.join("\n");
            if !text.is_empty() {
                text.push('\n');
            }
            if let Err(e) = std::fs::write(path, text) {
                non_critical("save history", path, e);
            }
        }
    }

    fn trim(&mut self) {
        if self.history.len() > self.limit {
            let excess = self.history.len() - self.limit;
            self.history.drain(..excess);
        }
    }
}

fn append_log_line(path: &Path, command: &str) -> io::Result<()> {
    let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S");
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "[{}] {}", timestamp, command)
}

fn non_critical(operation: &str, path: &Path, error: io::Error) {
    tracing::warn!(operation, path = %path.display(), %error, "Journal I/O failed; continuing");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(dir: &Path, limit: usize) -> JournalSettings {
        JournalSettings {
            enabled: true,
            log_file: Some(dir.join("tcon.log")),
            history_file: Some(dir.join("tcon.history")),
            history_limit: limit,
        }
    }

    #[test]
    fn test_log_lines_are_timestamped() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::open(&settings(dir.path(), 10));
        journal.record("goto-position 800");
        journal.record("   ");
        journal.record("read-angle");

        let log = std::fs::read_to_string(dir.path().join("tcon.log")).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] goto-position 800"));
        // "[YYYY-MM-DD HH:MM:SS] " is 22 characters.
        assert_eq!(&lines[1][21..], " read-angle");
    }

    #[test]
    fn test_history_persists_and_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut journal = Journal::open(&settings(dir.path(), 2));
            journal.record("read-position");
            journal.record("goto-angle 40");
            journal.record("reset-angle");
            assert_eq!(journal.history(), ["goto-angle 40", "reset-angle"]);
            journal.persist();
        }

        let reopened = Journal::open(&settings(dir.path(), 2));
        assert_eq!(reopened.recall(1), Some("goto-angle 40"));
        assert_eq!(reopened.recall(2), Some("reset-angle"));
        assert_eq!(reopened.recall(0), None);
        assert_eq!(reopened.recall(3), None);
    }

    #[test]
    fn test_unwritable_paths_are_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("missing-dir");
        let mut journal = Journal::open(&JournalSettings {
            enabled: true,
            log_file: Some(blocked.join("tcon.log")),
            history_file: Some(blocked.join("tcon.history")),
            history_limit: 10,
        });
        journal.record("stop");
        journal.persist();
        assert_eq!(journal.history(), ["stop"]);
    }

    #[test]
    fn test_disabled_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = settings(dir.path(), 10);
        config.enabled = false;

        let mut journal = Journal::open(&config);
        journal.record("status");
        journal.persist();
        assert_eq!(journal.recall(1), Some("status"));
        assert!(!dir.path().join("tcon.log").exists());
        assert!(!dir.path().join("tcon.history").exists());
    }
}
