use std::io;
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, RawFd};

use crate::cutils::{cerr, safe_isatty};

use super::fd::Descriptor;

/// A freshly allocated pseudo-terminal pair.
///
/// The parent keeps the leader; the follower only lives long enough to be
/// dup'ed into a child's standard streams.
pub(crate) struct Pty {
    /// The leader side of the pty.
    pub(crate) leader: Descriptor,
    /// The follower side of the pty.
    pub(crate) follower: Descriptor,
}

impl Pty {
    pub(crate) fn open() -> io::Result<Self> {
        // SAFETY: posix_openpt takes no pointers and reports failure with -1.
        let leader = cerr(unsafe {
            libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY | libc::O_CLOEXEC)
        })?;
        // SAFETY: posix_openpt returned an open fd that nothing else owns.
        let leader = unsafe { Descriptor::from_raw_fd(leader) };

        // SAFETY: neither call can cause UB when handed an open pty fd.
        cerr(unsafe { libc::grantpt(leader.as_raw_fd()) })?;
        cerr(unsafe { libc::unlockpt(leader.as_raw_fd()) })?;

        let mut path = [0 as libc::c_char; 128];
        // SAFETY: `path` is valid writable memory of the stated length.
        // Unlike most of libc, ptsname_r reports errors through its return
        // value and leaves errno alone.
        let error = unsafe { libc::ptsname_r(leader.as_raw_fd(), path.as_mut_ptr(), path.len()) };
        if error != 0 {
            return Err(io::Error::from_raw_os_error(error));
        }

        // SAFETY: ptsname_r filled `path` with a null-terminated string.
        let follower = cerr(unsafe {
            libc::open(
                path.as_ptr(),
                libc::O_RDWR | libc::O_NOCTTY | libc::O_CLOEXEC,
            )
        })?;
        // SAFETY: `open` returned an open fd that nothing else owns.
        let follower = unsafe { Descriptor::from_raw_fd(follower) };

        Ok(Self { leader, follower })
    }
}

/// Line-discipline options of the child's terminal.
///
/// The default (all options off) is the regular cooked terminal: input is
/// echoed and assembled into lines, output newlines are left alone.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PtyOptions {
    /// Do not echo input back to the terminal.
    pub disable_echo: bool,
    /// Deliver input byte by byte instead of line by line.
    pub non_canonical: bool,
    /// Translate `"\n"` into `"\r\n"` on output.
    pub output_crlf: bool,
}

impl PtyOptions {
    /// Read the current options from a terminal descriptor.
    ///
    /// Fails with the platform error (`ENOTTY`) when `fd` is not a terminal.
    pub fn from_fd(fd: RawFd) -> io::Result<Self> {
        let termios = tcgetattr(fd)?;

        Ok(Self {
            disable_echo: termios.c_lflag & libc::ECHO == 0,
            non_canonical: termios.c_lflag & libc::ICANON == 0,
            output_crlf: termios.c_oflag & libc::ONLCR != 0,
        })
    }

    /// Apply these options to a terminal descriptor.
    ///
    /// `immediately` requests `TCSANOW` and `drain_first` requests
    /// `TCSADRAIN`; passing neither leaves the action bitmask at zero, which
    /// POSIX treats as `TCSANOW` as well.
    pub fn apply(self, fd: RawFd, immediately: bool, drain_first: bool) -> io::Result<()> {
        let mut termios = tcgetattr(fd)?;

        set_flag(&mut termios.c_lflag, libc::ECHO, !self.disable_echo);
        set_flag(&mut termios.c_lflag, libc::ICANON, !self.non_canonical);
        set_flag(&mut termios.c_oflag, libc::ONLCR, self.output_crlf);

        if self.non_canonical {
            // Leaving canonical mode exposes the VMIN/VTIME slots, which on
            // Linux alias the canonical control characters. Reads must
            // return as soon as a single byte arrives.
            termios.c_cc[libc::VMIN] = 1;
            termios.c_cc[libc::VTIME] = 0;
        }

        let mut action = 0;
        if immediately {
            action |= libc::TCSANOW;
        }
        if drain_first {
            action |= libc::TCSADRAIN;
        }

        // SAFETY: `termios` is an initialized value obtained from tcgetattr.
        cerr(unsafe { libc::tcsetattr(fd, action, &termios) })?;

        Ok(())
    }
}

fn set_flag(flags: &mut libc::tcflag_t, flag: libc::tcflag_t, enable: bool) {
    if enable {
        *flags |= flag;
    } else {
        *flags &= !flag;
    }
}

fn tcgetattr(fd: RawFd) -> io::Result<libc::termios> {
    if !safe_isatty(fd) {
        return Err(io::Error::from_raw_os_error(libc::ENOTTY));
    }

    let mut termios = MaybeUninit::<libc::termios>::uninit();
    // SAFETY: tcgetattr expects a pointer to writable memory for one termios.
    cerr(unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) })?;
    // SAFETY: tcgetattr returned 0, so the value is initialized.
    Ok(unsafe { termios.assume_init() })
}

/// Dimensions of a terminal, in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermSize {
    pub rows: u16,
    pub cols: u16,
}

pub(crate) fn term_size(fd: RawFd) -> io::Result<TermSize> {
    let mut size = MaybeUninit::<libc::winsize>::uninit();
    // SAFETY: TIOCGWINSZ writes one `winsize` through the provided pointer.
    cerr(unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, size.as_mut_ptr()) })?;
    // SAFETY: the ioctl returned 0, so the value is initialized.
    let size = unsafe { size.assume_init() };

    Ok(TermSize {
        rows: size.ws_row,
        cols: size.ws_col,
    })
}

pub(crate) fn set_term_size(fd: RawFd, size: TermSize) -> io::Result<()> {
    let size = libc::winsize {
        ws_row: size.rows,
        ws_col: size.cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    // SAFETY: TIOCSWINSZ reads one initialized `winsize` through the pointer.
    cerr(unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, &size) })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::os::fd::AsRawFd;

    use pretty_assertions::assert_eq;

    use super::{set_term_size, term_size, tcgetattr, Pty, PtyOptions, TermSize};

    fn all_option_sets() -> impl Iterator<Item = PtyOptions> {
        (0..8).map(|bits| PtyOptions {
            disable_echo: bits & 1 != 0,
            non_canonical: bits & 2 != 0,
            output_crlf: bits & 4 != 0,
        })
    }

    #[test]
    fn options_round_trip() {
        let pty = Pty::open().unwrap();
        let fd = pty.leader.as_raw_fd();

        for options in all_option_sets() {
            options.apply(fd, true, false).unwrap();
            assert_eq!(PtyOptions::from_fd(fd).unwrap(), options);
        }
    }

    #[test]
    fn default_options_mean_cooked_terminal() {
        let pty = Pty::open().unwrap();
        let fd = pty.leader.as_raw_fd();

        PtyOptions::default().apply(fd, true, false).unwrap();
        let termios = tcgetattr(fd).unwrap();

        assert_ne!(termios.c_lflag & libc::ECHO, 0);
        assert_ne!(termios.c_lflag & libc::ICANON, 0);
        assert_eq!(termios.c_oflag & libc::ONLCR, 0);
    }

    #[test]
    fn termios_bits_match_options() {
        let pty = Pty::open().unwrap();
        let fd = pty.leader.as_raw_fd();

        let options = PtyOptions {
            disable_echo: true,
            non_canonical: true,
            output_crlf: true,
        };
        options.apply(fd, true, true).unwrap();
        let termios = tcgetattr(fd).unwrap();

        assert_eq!(termios.c_lflag & libc::ECHO, 0);
        assert_eq!(termios.c_lflag & libc::ICANON, 0);
        assert_ne!(termios.c_oflag & libc::ONLCR, 0);
    }

    #[test]
    fn not_a_terminal() {
        let file = File::open("/bin/sh").unwrap();
        let err = PtyOptions::from_fd(file.as_raw_fd()).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOTTY));

        let err = PtyOptions::default()
            .apply(file.as_raw_fd(), true, false)
            .unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOTTY));
    }

    #[test]
    fn window_size_round_trip() {
        let pty = Pty::open().unwrap();
        let fd = pty.leader.as_raw_fd();

        let size = TermSize { rows: 34, cols: 111 };
        set_term_size(fd, size).unwrap();
        assert_eq!(term_size(fd).unwrap(), size);
    }
}
