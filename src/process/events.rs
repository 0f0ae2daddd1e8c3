//! Run events and exit classification.

use std::fmt;
use std::io;
use std::process::ExitStatus;

/// Which standard stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Why a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The process called `exit` (or returned from `main`).
    Exit,
    /// The process was killed by a signal it did not handle, or its fate
    /// could not be observed.
    UncaughtSignal,
}

/// Exit status and termination reason of one run.
///
/// `status` is the exit code for [`TerminationReason::Exit`] and the signal
/// number for [`TerminationReason::UncaughtSignal`], matching what
/// `ExitStatus::code` / `ExitStatusExt::signal` report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub status: i32,
    pub reason: TerminationReason,
}

impl ProcessExit {
    /// Status reported when the child's fate is unknown (wait failed, or
    /// the run was torn down abnormally).
    pub const ABNORMAL_STATUS: i32 = -1;

    /// Classify an OS exit status.
    #[must_use]
    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self {
                status: code,
                reason: TerminationReason::Exit,
            };
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self {
                    status: signal,
                    reason: TerminationReason::UncaughtSignal,
                };
            }
        }

        Self::abnormal()
    }

    /// Exit for a run whose child could not be observed to completion.
    #[must_use]
    pub fn abnormal() -> Self {
        Self {
            status: Self::ABNORMAL_STATUS,
            reason: TerminationReason::UncaughtSignal,
        }
    }

    /// True for a normal exit with status zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.reason == TerminationReason::Exit && self.status == 0
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            TerminationReason::Exit => write!(f, "exited with status {}", self.status),
            TerminationReason::UncaughtSignal if self.status < 0 => {
                f.write_str("terminated abnormally")
            }
            TerminationReason::UncaughtSignal => write!(f, "killed by signal {}", self.status),
        }
    }
}

/// One message on a run's event channel.
///
/// Stream pumps emit `Chunk`, `ReadFailed` and `Closed`; the exit watcher
/// emits `Exited` exactly once. A single coordinator consumes them in order.
#[derive(Debug)]
pub enum RunEvent {
    /// Bytes that were available on a stream at one readiness point.
    Chunk { stream: StreamKind, bytes: Vec<u8> },
    /// Reading the stream failed; the pump stops and `Closed` follows.
    ReadFailed { stream: StreamKind, error: io::Error },
    /// The stream reached end-of-file.
    Closed { stream: StreamKind },
    /// The child process ended.
    Exited(io::Result<ExitStatus>),
}
