//! Colored CLI display utilities for driven process output.
//!
//! Chunks are written to the terminal exactly as received; status lines are
//! timestamped and colored.

use std::ffi::OsString;
use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::interface::CommandError;
use crate::process::{ProcessExit, StreamKind, TerminationReason};

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Truncate a string to a maximum length, adding ellipsis if truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize, raw_mode: bool) -> String {
    if raw_mode || s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return "...".to_string();
    }
    let kept: String = s.chars().take(max_len - 3).collect();
    format!("{kept}...")
}

/// Render an argument vector as a shell-quoted command line.
#[must_use]
pub fn format_command_line(argv: &[OsString]) -> String {
    argv.iter()
        .map(|arg| shell_escape::escape(arg.to_string_lossy()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Print the command about to run.
pub fn print_run_start(command_line: &str) {
    eprintln!(
        "{} {} {}",
        timestamp().dimmed(),
        "[RUN]".blue().bold(),
        command_line.cyan()
    );
}

/// Pass a chunk through to the matching terminal stream.
pub fn print_chunk(stream: StreamKind, bytes: &[u8]) {
    let result = match stream {
        StreamKind::Stdout => {
            let mut out = io::stdout().lock();
            out.write_all(bytes).and_then(|()| out.flush())
        }
        StreamKind::Stderr => {
            let mut err = io::stderr().lock();
            err.write_all(bytes).and_then(|()| err.flush())
        }
    };
    if let Err(e) = result {
        tracing::debug!(%stream, error = %e, "failed to echo chunk");
    }
}

/// Print how a run ended, plus a short form of any stderr error.
pub fn print_completion(exit: &ProcessExit, error: Option<&CommandError>, raw_mode: bool) {
    let ts = timestamp();
    match exit.reason {
        TerminationReason::Exit if exit.status == 0 => {
            eprintln!("{} {} {}", ts.dimmed(), "[DONE]".green().bold(), exit);
        }
        TerminationReason::Exit => {
            eprintln!("{} {} {}", ts.dimmed(), "[FAILED]".red().bold(), exit);
        }
        TerminationReason::UncaughtSignal => {
            eprintln!("{} {} {}", ts.dimmed(), "[KILLED]".yellow().bold(), exit);
        }
    }
    if let Some(error) = error {
        eprintln!(
            "{} {} {}",
            ts.dimmed(),
            "[STDERR]".red().bold(),
            truncate(error.message(), 200, raw_mode).red()
        );
    }
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), message);
}
