use std::{io, mem::MaybeUninit};

use crate::cutils::cerr;

use super::SignalNumber;

#[repr(transparent)]
pub(super) struct SignalAction {
    raw: libc::sigaction,
}

impl SignalAction {
    /// An action that streams the delivered signal information into the
    /// current [`super::SignalStream`].
    pub(super) fn stream() -> io::Result<Self> {
        let mut raw = make_zeroed_sigaction();
        // SA_RESTART keeps interruptible syscalls running while the handler
        // is alive; SA_SIGINFO selects the three-argument handler form. The
        // full mask keeps other signals from interrupting `send_siginfo`.
        raw.sa_sigaction = super::stream::send_siginfo as libc::sighandler_t;
        raw.sa_mask = SignalSet::full()?.raw;
        raw.sa_flags = libc::SA_RESTART | libc::SA_SIGINFO;

        Ok(Self { raw })
    }

    pub(super) fn register(&self, signal: SignalNumber) -> io::Result<Self> {
        let mut original_action = MaybeUninit::<Self>::zeroed();

        // SAFETY: both pointers point to valid memory for one sigaction.
        cerr(unsafe { libc::sigaction(signal, &self.raw, original_action.as_mut_ptr().cast()) })?;

        // SAFETY: sigaction returned 0, so the old action was written.
        Ok(unsafe { original_action.assume_init() })
    }
}

fn make_zeroed_sigaction() -> libc::sigaction {
    // SAFETY: since sigaction is a C struct, all-zeroes is a valid representation.
    // We cannot use a "literal struct" initialization method since the exact
    // representation of libc::sigaction is not fixed across platforms.
    unsafe { std::mem::zeroed() }
}

/// A set of signals, as consumed by the masking interfaces.
#[repr(transparent)]
pub(crate) struct SignalSet {
    raw: libc::sigset_t,
}

impl SignalSet {
    /// Create an empty set.
    pub(crate) fn empty() -> io::Result<Self> {
        let mut set = MaybeUninit::<Self>::zeroed();

        // SAFETY: sigemptyset initializes the value behind the pointer.
        cerr(unsafe { libc::sigemptyset(set.as_mut_ptr().cast()) })?;

        // SAFETY: the call returned 0, so the set is initialized.
        Ok(unsafe { set.assume_init() })
    }

    /// Create a set containing all the signals.
    pub(crate) fn full() -> io::Result<Self> {
        let mut set = MaybeUninit::<Self>::zeroed();

        // SAFETY: sigfillset initializes the value behind the pointer.
        cerr(unsafe { libc::sigfillset(set.as_mut_ptr().cast()) })?;

        // SAFETY: the call returned 0, so the set is initialized.
        Ok(unsafe { set.assume_init() })
    }

    /// Create a set containing exactly the given signals.
    pub(crate) fn from_signals(signals: &[SignalNumber]) -> io::Result<Self> {
        let mut set = Self::empty()?;

        for &signal in signals {
            // SAFETY: the set was initialized above; an invalid signal number
            // makes sigaddset fail, it cannot cause UB.
            cerr(unsafe { libc::sigaddset(&mut set.raw, signal) })?;
        }

        Ok(set)
    }

    pub(crate) fn as_raw(&self) -> &libc::sigset_t {
        &self.raw
    }
}
