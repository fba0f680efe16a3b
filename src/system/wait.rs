use std::io;

use libc::{
    c_int, siginfo_t, CLD_CONTINUED, CLD_DUMPED, CLD_EXITED, CLD_KILLED, CLD_STOPPED, CLD_TRAPPED,
    P_PID, SIGCHLD, WCONTINUED, WEXITED, WNOHANG, WNOWAIT, WSTOPPED,
};

use crate::cutils::cerr;

use super::signal::SignalNumber;
use super::ProcessId;

mod sealed {
    pub(crate) trait Sealed {}

    impl Sealed for crate::system::ProcessId {}
}

pub(crate) trait Wait: sealed::Sealed {
    /// Wait for a child process to change state.
    ///
    /// Without [`WaitOptions::no_hang`] this blocks until the child
    /// identified by the given process ID exits, stops or continues.
    fn wait(self, options: WaitOptions) -> io::Result<WaitEvent>;
}

impl Wait for ProcessId {
    fn wait(self, options: WaitOptions) -> io::Result<WaitEvent> {
        // SAFETY: siginfo_t is a C struct, so all-zeroes is a valid value.
        // Zeroing matters: with `WNOHANG`, waitid reports "nothing pending"
        // by returning 0 and leaving the struct untouched.
        let mut info: siginfo_t = unsafe { std::mem::zeroed() };

        // SAFETY: `info` is a valid pointer to writable memory, and waitid
        // cannot cause UB for any pid value.
        cerr(unsafe { libc::waitid(P_PID, self.get() as libc::id_t, &mut info, options.flags) })?;

        Ok(WaitEvent::decode(&info))
    }
}

/// Options to configure how [`Wait::wait`] waits for a child.
pub(crate) struct WaitOptions {
    flags: c_int,
}

impl WaitOptions {
    /// Report exits, stops and continues.
    pub(crate) const fn changes() -> Self {
        Self {
            flags: WEXITED | WSTOPPED | WCONTINUED,
        }
    }

    /// Return immediately when no event is pending.
    pub(crate) const fn no_hang(mut self) -> Self {
        self.flags |= WNOHANG;
        self
    }

    /// Leave the reported event queued so a later wait call sees it again.
    pub(crate) const fn keep_pending(mut self) -> Self {
        self.flags |= WNOWAIT;
        self
    }
}

/// A state change reported for a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChildEvent {
    /// The child exited normally with the given code.
    Exited(c_int),
    /// The child was terminated by a signal.
    Killed {
        signal: SignalNumber,
        core_dump: bool,
    },
    /// The child was stopped by a signal.
    Stopped(SignalNumber),
    /// The child resumed after a stop.
    Continued,
}

/// Outcome of a single waitid call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitEvent {
    /// Nothing was pending (only possible with [`WaitOptions::no_hang`]).
    NoChange,
    /// A child changed state.
    Child { pid: ProcessId, event: ChildEvent },
    /// The call reported something that is not a SIGCHLD child event.
    Unexpected,
}

impl WaitEvent {
    fn decode(info: &siginfo_t) -> Self {
        if info.si_signo == 0 {
            return Self::NoChange;
        }

        if info.si_signo != SIGCHLD {
            return Self::Unexpected;
        }

        // SAFETY: waitid reported a child event, so the pid and status
        // fields of the union are the ones that were filled in.
        let pid = ProcessId::new(unsafe { info.si_pid() });
        // SAFETY: same as above.
        let status = unsafe { info.si_status() };

        let event = match info.si_code {
            CLD_EXITED => ChildEvent::Exited(status),
            CLD_KILLED => ChildEvent::Killed {
                signal: status,
                core_dump: false,
            },
            CLD_DUMPED => ChildEvent::Killed {
                signal: status,
                core_dump: true,
            },
            CLD_STOPPED | CLD_TRAPPED => ChildEvent::Stopped(status),
            CLD_CONTINUED => ChildEvent::Continued,
            _ => return Self::Unexpected,
        };

        Self::Child { pid, event }
    }
}
