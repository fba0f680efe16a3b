use std::{
    io,
    mem::MaybeUninit,
    os::{
        fd::{AsRawFd, RawFd},
        unix::net::UnixStream,
    },
    sync::atomic::{AtomicI32, Ordering},
};

use crate::cutils::cerr;

use super::{info::SignalInfo, SignalNumber};

static TX: AtomicI32 = AtomicI32::new(-1);

pub(super) extern "C" fn send_siginfo(
    _signal: SignalNumber,
    info: *const libc::siginfo_t,
    _context: *mut libc::c_void,
) {
    // Everything in here must be async-signal-safe: an atomic load and a
    // non-blocking send on a socket.
    let tx = TX.load(Ordering::Relaxed);
    if tx != -1 {
        // SAFETY: the kernel hands the handler a valid siginfo_t pointer,
        // and `tx` is the write end of an open socket pair.
        unsafe { libc::send(tx, info.cast(), SignalInfo::SIZE, libc::MSG_DONTWAIT) };
    }
}

/// Receiving end of the signal information sent by [`send_siginfo`].
///
/// Only one stream is active at a time; creating a new one redirects the
/// handler's traffic to it.
pub(crate) struct SignalStream {
    rx: UnixStream,
    _tx: UnixStream,
}

impl SignalStream {
    pub(crate) fn new() -> io::Result<Self> {
        let (rx, tx) = UnixStream::pair()?;

        TX.store(tx.as_raw_fd(), Ordering::Relaxed);

        Ok(Self { rx, _tx: tx })
    }

    /// Receive the information related to the arrival of a signal.
    ///
    /// Blocks until a signal registered through
    /// [`super::SignalHandler::stream`] arrives.
    pub(crate) fn recv(&mut self) -> io::Result<SignalInfo> {
        let mut info = MaybeUninit::<SignalInfo>::uninit();
        let fd = self.rx.as_raw_fd();
        // SAFETY: `info` is valid writable memory of the requested size.
        let bytes = cerr(unsafe { libc::recv(fd, info.as_mut_ptr().cast(), SignalInfo::SIZE, 0) })?;

        if bytes as usize != SignalInfo::SIZE {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Not enough bytes when receiving `siginfo_t`",
            ));
        }
        // SAFETY: we can assume `info` is initialized because `recv` wrote enough bytes to fill
        // the value and `siginfo_t` is POD.
        Ok(unsafe { info.assume_init() })
    }
}

impl AsRawFd for SignalStream {
    fn as_raw_fd(&self) -> RawFd {
        self.rx.as_raw_fd()
    }
}
