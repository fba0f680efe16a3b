use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::cutils::cerr;

/// Exclusive owner of a single open file descriptor.
///
/// The descriptor is closed exactly once, when the value is dropped; close
/// errors are swallowed. Values can move between threads but cannot be
/// cloned; sharing one descriptor between a reader task and its owner goes
/// through an `Arc` instead.
#[derive(Debug)]
pub(crate) struct Descriptor {
    fd: OwnedFd,
}

impl Descriptor {
    /// Assume ownership of a raw file descriptor.
    ///
    /// # Safety
    ///
    /// `fd` must be open and not owned by anything else.
    pub(crate) unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Self {
            // SAFETY: by the function contract, `fd` is open and unowned.
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        }
    }

    /// Read into `buf`, returning the number of bytes read. Zero means end
    /// of file.
    pub(crate) fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: the buffer pointer and length describe valid owned memory.
        let bytes = cerr(unsafe {
            libc::read(self.fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len())
        })?;

        Ok(bytes as usize)
    }

    /// Write as much of `buf` as the descriptor accepts, returning the
    /// number of bytes written.
    pub(crate) fn write(&self, buf: &[u8]) -> io::Result<usize> {
        // SAFETY: the buffer pointer and length describe valid memory.
        let bytes = cerr(unsafe {
            libc::write(self.fd.as_raw_fd(), buf.as_ptr().cast(), buf.len())
        })?;

        Ok(bytes as usize)
    }
}

impl From<OwnedFd> for Descriptor {
    fn from(fd: OwnedFd) -> Self {
        Self { fd }
    }
}

impl AsRawFd for Descriptor {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
