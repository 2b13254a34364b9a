//! Text command front end.
//!
//! Parses operator commands such as `in first 0.5` or `abort` and runs them
//! against a [`Scraper`]. The CLI uses [`execute`] for one-shot subcommands and
//! [`run_session`] for the interactive shell, where each line is executed to
//! completion before the next one is read.
//!
//! Failures become output lines, never early exits: a session keeps going
//! after a motor refuses a command.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{AppResult, PanelError};
use crate::scraper::{Axis, Scraper};

const HELP: &str = "\
commands:
  status                 read every axis and readout
  in <axis> <step>       close the jaw by <step> (negative increment)
  out <axis> <step>      open the jaw by <step>
  move <axis> <target>   move to an absolute position
  abort                  stop all axes
  help                   this text
  quit                   leave the shell
axes: first, second, gap, offset";

/// One operator command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShellCommand {
    /// Read positions and readouts.
    Status,
    /// Relative move towards the beam.
    In {
        /// Target axis.
        axis: Axis,
        /// Step magnitude as typed.
        step: f64,
    },
    /// Relative move away from the beam.
    Out {
        /// Target axis.
        axis: Axis,
        /// Step magnitude as typed.
        step: f64,
    },
    /// Absolute move.
    Move {
        /// Target axis.
        axis: Axis,
        /// Absolute position.
        target: f64,
    },
    /// Abort every axis.
    Abort,
    /// Print usage.
    Help,
    /// End the session.
    Quit,
}

impl ShellCommand {
    /// Parse one input line. Blank lines and `#` comments yield `None`.
    pub fn parse(line: &str) -> AppResult<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((keyword, args)) = words.split_first() else {
            return Ok(None);
        };
        let keyword = keyword.to_ascii_lowercase();
        let command = match (keyword.as_str(), args) {
            ("status", []) => ShellCommand::Status,
            ("abort", []) => ShellCommand::Abort,
            ("help" | "?", []) => ShellCommand::Help,
            ("quit" | "exit", []) => ShellCommand::Quit,
            ("in", [axis, step]) => ShellCommand::In {
                axis: parse_axis(axis)?,
                step: parse_step(step)?,
            },
            ("out", [axis, step]) => ShellCommand::Out {
                axis: parse_axis(axis)?,
                step: parse_step(step)?,
            },
            ("move", [axis, target]) => ShellCommand::Move {
                axis: parse_axis(axis)?,
                target: parse_number(target)?,
            },
            _ => {
                return Err(PanelError::InvalidCommand(format!(
                    "'{line}' (type 'help' for usage)"
                )))
            }
        };
        Ok(Some(command))
    }
}

fn parse_axis(word: &str) -> AppResult<Axis> {
    word.parse()
        .map_err(|e: crate::scraper::ParseAxisError| PanelError::InvalidCommand(e.to_string()))
}

fn parse_number(word: &str) -> AppResult<f64> {
    match word.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(PanelError::InvalidCommand(format!("'{word}' is not a number"))),
    }
}

/// Parse a jaw step. Direction comes from `in`/`out`, so the magnitude must
/// not be negative.
pub fn parse_step(word: &str) -> AppResult<f64> {
    let step = parse_number(word)?;
    if step < 0.0 {
        return Err(PanelError::InvalidCommand(format!(
            "step '{word}' must not be negative; use in/out for direction"
        )));
    }
    Ok(step)
}

/// Output of one executed command.
#[derive(Debug, Default)]
pub struct Reply {
    /// Lines to show the operator.
    pub lines: Vec<String>,
    /// True when any part of the command failed.
    pub failed: bool,
}

impl Reply {
    fn ok(line: impl Into<String>) -> Self {
        Self {
            lines: vec![line.into()],
            failed: false,
        }
    }

    fn error(err: &PanelError) -> Self {
        Self {
            lines: vec![format!("error: {err}")],
            failed: true,
        }
    }
}

/// Run one command against `scraper`.
pub async fn execute(scraper: &Scraper, command: &ShellCommand) -> Reply {
    let outcome = match *command {
        ShellCommand::Status => {
            let snapshot = scraper.status().await;
            let failed = snapshot.axes.iter().any(|a| a.position.is_err())
                || snapshot.readouts.iter().any(|r| r.value.is_err());
            return Reply {
                lines: snapshot.to_string().lines().map(str::to_string).collect(),
                failed,
            };
        }
        ShellCommand::In { axis, step } => scraper
            .jaw_in(axis, step)
            .await
            .map(|()| format!("{} in by {}", scraper.label(axis), step)),
        ShellCommand::Out { axis, step } => scraper
            .jaw_out(axis, step)
            .await
            .map(|()| format!("{} out by {}", scraper.label(axis), step)),
        ShellCommand::Move { axis, target } => scraper
            .move_to(axis, target)
            .await
            .map(|()| format!("{} to {}", scraper.label(axis), target)),
        ShellCommand::Abort => {
            let report = scraper.abort().await;
            if report.is_clean() {
                return Reply::ok(format!("abort sent to {} axes", report.attempted));
            }
            return Reply {
                lines: report
                    .failures
                    .iter()
                    .map(|err| format!("error: {err}"))
                    .collect(),
                failed: true,
            };
        }
        ShellCommand::Help => return Reply::ok(HELP),
        ShellCommand::Quit => return Reply::default(),
    };

    match outcome {
        Ok(line) => Reply::ok(line),
        Err(err) => Reply::error(&err),
    }
}

/// Totals of an interactive session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    /// Commands executed.
    pub commands: usize,
    /// Commands that failed, including unparsable lines.
    pub failures: usize,
}

/// Read commands from `reader` until `quit` or end of input, writing replies
/// to `writer`.
pub async fn run_session<R, W>(scraper: &Scraper, reader: R, mut writer: W) -> AppResult<SessionSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut summary = SessionSummary::default();
    let prompt = format!("{}> ", scraper.id());
    let mut lines = reader.lines();

    writer
        .write_all(format!("{} ({})\n", scraper.window_title(), scraper.tooltip()).as_bytes())
        .await?;

    loop {
        writer.write_all(prompt.as_bytes()).await?;
        writer.flush().await?;

        let Some(line) = lines.next_line().await? else {
            writer.write_all(b"\n").await?;
            break;
        };
        debug!("shell input: {line}");

        let command = match ShellCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                summary.failures += 1;
                writer.write_all(format!("error: {err}\n").as_bytes()).await?;
                continue;
            }
        };
        if command == ShellCommand::Quit {
            break;
        }

        summary.commands += 1;
        let reply = execute(scraper, &command).await;
        if reply.failed {
            summary.failures += 1;
        }
        for line in reply.lines {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
    }

    writer.flush().await?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ShellCommand::parse("status").unwrap(), Some(ShellCommand::Status));
        assert_eq!(
            ShellCommand::parse("  in first 0.5 ").unwrap(),
            Some(ShellCommand::In {
                axis: Axis::First,
                step: 0.5
            })
        );
        assert_eq!(
            ShellCommand::parse("move gap -1.25").unwrap(),
            Some(ShellCommand::Move {
                axis: Axis::Gap,
                target: -1.25
            })
        );
        assert_eq!(ShellCommand::parse("exit").unwrap(), Some(ShellCommand::Quit));
        assert_eq!(ShellCommand::parse("# comment").unwrap(), None);
        assert_eq!(ShellCommand::parse("   ").unwrap(), None);
    }

    #[test]
    fn test_keywords_ignore_case() {
        assert_eq!(ShellCommand::parse("STATUS").unwrap(), Some(ShellCommand::Status));
        assert_eq!(ShellCommand::parse("Abort").unwrap(), Some(ShellCommand::Abort));
        assert_eq!(
            ShellCommand::parse("OUT Second 0.25").unwrap(),
            Some(ShellCommand::Out {
                axis: Axis::Second,
                step: 0.25
            })
        );
    }

    #[test]
    fn test_zero_step_is_accepted() {
        assert_eq!(parse_step("0").unwrap(), 0.0);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        for line in [
            "in",
            "in third 1",
            "out first fast",
            "move gap NaN",
            "jump",
            "in first -0.5",
            "out gap -1",
            "status now",
        ] {
            assert!(
                matches!(ShellCommand::parse(line), Err(PanelError::InvalidCommand(_))),
                "{line:?} should be rejected"
            );
        }
    }
}
