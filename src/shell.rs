//! Line-oriented operator shell.
//!
//! Reads commands from an async line source, records them in the
//! [`Journal`], hands them to the [`CommandDispatcher`] and prints each
//! outcome. Device errors are reported and the shell keeps running; only
//! end of input or `exit` ends the session.
//!
//! Recall: `history` lists recorded commands, `!N` re-runs entry `N`.

use crate::dispatcher::{CommandDispatcher, COMMANDS};
use crate::journal::Journal;
use async_trait::async_trait;
use std::io;
use tcon_core::Confirm;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const PROMPT: &str = "tcon> ";

/// Operator input and output. Also answers limit confirmations, reading
/// from the same line source as the commands.
#[derive(Debug)]
pub struct Console<R, W> {
    input: R,
    output: W,
}

impl<R, W> Console<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Console over `input` and `output`.
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Print `prompt` and read one line. `None` at end of input.
    pub async fn prompt(&mut self, prompt: &str) -> io::Result<Option<String>> {
        self.output.write_all(prompt.as_bytes()).await?;
        self.output.flush().await?;

        let mut line = String::new();
        if self.input.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    /// Print one line.
    pub async fn say(&mut self, text: &str) -> io::Result<()> {
        self.output.write_all(text.as_bytes()).await?;
        self.output.write_all(b"\n").await?;
        self.output.flush().await
    }

    /// Give back the output sink.
    pub fn into_output(self) -> W {
        self.output
    }
}

#[async_trait]
impl<R, W> Confirm for Console<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn confirm(&mut self, question: &str) -> bool {
        match self.prompt(&format!("{} [y/N] ", question)).await {
            Ok(Some(answer)) => is_affirmative(&answer),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "Confirmation prompt failed; treating as no");
                false
            }
        }
    }
}

/// Only an explicit yes counts.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Run one command line: record it, dispatch it, print the outcome.
pub async fn run_line<R, W>(
    dispatcher: &mut CommandDispatcher,
    console: &mut Console<R, W>,
    journal: &mut Journal,
    line: &str,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    journal.record(line);
    let message = match dispatcher.execute(line, console).await {
        Ok(outcome) => outcome.to_string(),
        Err(e) => format!("error: {}", e),
    };
    console.say(&message).await
}

/// Interactive loop until end of input or `exit`.
pub async fn run_shell<R, W>(
    dispatcher: &mut CommandDispatcher,
    console: &mut Console<R, W>,
    journal: &mut Journal,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    while let Some(line) = console.prompt(PROMPT).await? {
        let line = match line.as_str() {
            "" => continue,
            "exit" | "quit" => break,
            "help" => {
                console.say(&help_text()).await?;
                continue;
            }
            "history" => {
                let listing = journal
                    .history()
                    .iter()
                    .enumerate()
                    .map(|(i, entry)| format!("{:>4}  {}", i + 1, entry))
                    .collect::<Vec<_>>()
                    .join("\n");
                console.say(&listing).await?;
                continue;
            }
            recall if recall.starts_with('!') => {
                match recall[1..].parse::<usize>().ok().and_then(|n| journal.recall(n)) {
                    Some(entry) => {
                        let entry = entry.to_string();
                        console.say(&entry).await?;
                        entry
                    }
                    None => {
                        console.say(&format!("error: no history entry {}", &recall[1..])).await?;
                        continue;
                    }
                }
            }
            other => other.to_string(),
        };

        run_line(dispatcher, console, journal, &line).await?;
    }
    Ok(())
}

fn help_text() -> String {
    let mut text = COMMANDS
        .iter()
        .map(|(usage, about)| format!("  {:<24}{}", usage, about))
        .collect::<Vec<_>>();
    text.push(format!("  {:<24}{}", "history", "list previous commands"));
    text.push(format!("  {:<24}{}", "!N", "re-run history entry N"));
    text.push(format!("  {:<24}{}", "exit", "leave the shell"));
    text.join("\n")
}
