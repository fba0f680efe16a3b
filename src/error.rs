use std::{fmt, io, path::PathBuf};

/// Everything that can go wrong while spawning or supervising a child.
///
/// Syscall failures keep their platform errno; [`Error::raw_os_error`]
/// recovers it for callers that match on error codes.
#[derive(Debug)]
pub enum Error {
    /// The executable path did not resolve to an existing file.
    FileNotFound(PathBuf),
    /// An executable URL used a scheme other than `file`.
    UnsupportedScheme(String),
    /// A syscall failed; the underlying errno is preserved.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::FileNotFound(path) => {
                write!(f, "file read: no such file '{}'", path.display())
            }
            Error::UnsupportedScheme(scheme) => {
                write!(f, "'{scheme}': unsupported scheme, expected a file URL")
            }
            Error::Io(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl Error {
    /// The errno carried by this error, if there is one.
    ///
    /// `FileNotFound` always reports `ENOENT` so callers never have to
    /// distinguish the wrapped form from a bare IO failure.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::FileNotFound(_) => Some(libc::ENOENT),
            Error::UnsupportedScheme(_) => None,
            Error::Io(err) => err.raw_os_error(),
        }
    }

    pub(crate) fn from_errno(errno: i32) -> Self {
        Error::Io(io::Error::from_raw_os_error(errno))
    }
}
