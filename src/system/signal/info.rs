use crate::system::ProcessId;

use super::SignalNumber;

/// Information related to the arrival of a signal.
#[derive(Clone, Copy)]
#[repr(transparent)]
pub(crate) struct SignalInfo {
    info: libc::siginfo_t,
}

impl SignalInfo {
    pub(super) const SIZE: usize = std::mem::size_of::<Self>();

    /// Returns whether the signal was sent by the user or not.
    pub(crate) fn is_user_signaled(&self) -> bool {
        // This matches `si_code <= SI_USER`, which libc does not expose.
        self.info.si_code <= 0
    }

    /// Gets the PID that caused the signal to be sent, which for a child
    /// state change is the pid of that child.
    pub(crate) fn pid(&self) -> ProcessId {
        // SAFETY: si_pid is set for the signals this crate streams (SIGCHLD).
        ProcessId::new(unsafe { self.info.si_pid() })
    }

    /// Gets the signal number.
    pub(crate) fn signal(&self) -> SignalNumber {
        self.info.si_signo
    }
}
