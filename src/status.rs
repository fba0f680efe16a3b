use std::fmt;

use crate::system::signal::{signal_name, SignalNumber};
use crate::system::ProcessId;

/// Lifecycle state of a supervised child process.
///
/// `Exited` and `UncaughtSignal` are terminal: once a child reaches one of
/// them its status never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The child has not been spawned yet.
    NotRunYet,
    /// The child is running.
    Running(ProcessId),
    /// The child was stopped by a signal and can be resumed.
    Suspended(ProcessId),
    /// The child exited on its own with the given code.
    Exited(i32),
    /// The child was terminated by a signal it did not handle.
    UncaughtSignal(SignalNumber),
}

impl Status {
    /// Whether this status can still change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Exited(_) | Status::UncaughtSignal(_))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::NotRunYet => write!(f, "not run yet"),
            Status::Running(pid) => write!(f, "running ({pid})"),
            Status::Suspended(pid) => write!(f, "suspended ({pid})"),
            Status::Exited(code) => write!(f, "exited with code {code}"),
            Status::UncaughtSignal(signal) => {
                write!(f, "terminated by {}", signal_name(*signal))
            }
        }
    }
}
