use std::ffi::{CStr, CString};
use std::io;
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, RawFd};
use std::ptr;
use std::sync::Arc;

use crate::cutils::cerr;
use crate::system::fd::Descriptor;
use crate::system::signal::{SignalNumber, SignalSet};
use crate::system::term::{Pty, PtyOptions};
use crate::system::ProcessId;

/// What the parent wants out of one of the child's output streams.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// Leave the stream alone; the child keeps whatever it inherits.
    None,
    /// Hand the parent a descriptor bound to `/dev/null`.
    Null,
    /// A unidirectional pipe; the parent reads what the child writes.
    Pipe,
    /// The stream goes to the child's terminal.
    #[default]
    Pty,
}

/// Everything needed to spawn one child, with storage owned by the caller.
pub(crate) struct SpawnRequest<'a> {
    pub(crate) program: &'a CStr,
    pub(crate) args: &'a [CString],
    /// `KEY=VALUE` entries; `None` inherits the parent environment.
    pub(crate) env: Option<&'a [CString]>,
    pub(crate) cwd: Option<&'a CStr>,
    pub(crate) stdout: Capture,
    pub(crate) stderr: Capture,
    pub(crate) pty_options: PtyOptions,
    pub(crate) signal_mask: Option<&'a [SignalNumber]>,
}

/// Parent-side handle for one captured output stream.
#[derive(Debug)]
pub(crate) enum ParentChannel {
    /// The stream is served by the pty leader; no separate descriptor exists.
    Pty,
    Owned(Arc<Descriptor>),
}

/// The outcome of one successful spawn: the child's pid and every
/// descriptor the parent keeps. Immutable from here on.
#[derive(Debug)]
pub(crate) struct Runner {
    pub(crate) pid: ProcessId,
    pub(crate) pty: Arc<Descriptor>,
    pub(crate) stdout: Option<ParentChannel>,
    pub(crate) stderr: Option<ParentChannel>,
}

impl Runner {
    /// Allocate a pty, wire up the requested capture channels and spawn the
    /// child in its own process group.
    ///
    /// Descriptor ownership is arranged so that no fd can leak on any exit
    /// path: fds the parent keeps ride in the returned `Runner` (and drop if
    /// this function fails), while fds that exist only for the child's
    /// benefit drop when this function returns, success or not. Everything
    /// is opened close-on-exec; the child only sees the copies made by its
    /// file actions.
    pub(crate) fn spawn(request: SpawnRequest<'_>) -> io::Result<Self> {
        let pty = Pty::open()?;
        request.pty_options.apply(pty.leader.as_raw_fd(), true, false)?;

        let mut actions = FileActions::new()?;
        actions.add_close(pty.leader.as_raw_fd())?;
        actions.add_dup2(pty.follower.as_raw_fd(), libc::STDIN_FILENO)?;

        if let Some(cwd) = request.cwd {
            actions.add_chdir(cwd)?;
        }

        // Write ends of capture pipes must stay open in the parent until
        // posix_spawn has dup'ed them into the child.
        let mut child_fds = Vec::new();

        let stdout = setup_channel(
            request.stdout,
            libc::STDOUT_FILENO,
            &pty,
            &mut actions,
            &mut child_fds,
        )?;
        let stderr = setup_channel(
            request.stderr,
            libc::STDERR_FILENO,
            &pty,
            &mut actions,
            &mut child_fds,
        )?;

        let mut attrs = SpawnAttrs::new()?;
        let mut flags = libc::POSIX_SPAWN_SETPGROUP;
        // Process group 0 puts the child in a fresh group of its own, so
        // signals aimed at the parent's group pass it by.
        attrs.set_pgroup(0)?;
        if let Some(signals) = request.signal_mask {
            flags |= libc::POSIX_SPAWN_SETSIGMASK;
            attrs.set_sigmask(&SignalSet::from_signals(signals)?)?;
        }
        attrs.set_flags(flags)?;

        // The CStrings backing these pointers are borrowed from the request,
        // which outlives the spawn call.
        let argv: Vec<*mut libc::c_char> = std::iter::once(request.program.as_ptr() as *mut _)
            .chain(request.args.iter().map(|arg| arg.as_ptr() as *mut _))
            .chain(std::iter::once(ptr::null_mut()))
            .collect();

        let explicit_env: Vec<*mut libc::c_char>;
        let envp = match request.env {
            Some(entries) => {
                explicit_env = entries
                    .iter()
                    .map(|entry| entry.as_ptr() as *mut _)
                    .chain(std::iter::once(ptr::null_mut()))
                    .collect();
                explicit_env.as_ptr()
            }
            // SAFETY: reading the global environment pointer is sound as no
            // other thread is expected to mutate it concurrently; this is
            // the same assumption libstd's env functions make.
            None => unsafe { environ },
        };

        let mut pid = 0;
        // SAFETY: all pointers passed here point to initialized values that
        // live until the call returns; argv and envp are null-terminated
        // arrays of null-terminated strings.
        spawn_check(unsafe {
            libc::posix_spawn(
                &mut pid,
                request.program.as_ptr(),
                &actions.raw,
                &attrs.raw,
                argv.as_ptr(),
                envp,
            )
        })?;

        let Pty { leader, follower } = pty;
        // The parent has no use for the follower: the child owns its copies.
        drop(follower);
        drop(child_fds);

        Ok(Self {
            pid: ProcessId::new(pid),
            pty: Arc::new(leader),
            stdout,
            stderr,
        })
    }
}

fn setup_channel(
    request: Capture,
    target: RawFd,
    pty: &Pty,
    actions: &mut FileActions,
    child_fds: &mut Vec<Descriptor>,
) -> io::Result<Option<ParentChannel>> {
    match request {
        Capture::None => Ok(None),
        Capture::Null => {
            // The parent-visible handle observes nothing; the child's fd is
            // deliberately left alone (see DESIGN.md on this asymmetry).
            let null = cerr(unsafe {
                // SAFETY: open with a static, null-terminated path.
                libc::open(
                    c"/dev/null".as_ptr(),
                    libc::O_RDWR | libc::O_CLOEXEC,
                )
            })?;
            // SAFETY: `open` returned an open fd that nothing else owns.
            let null = unsafe { Descriptor::from_raw_fd(null) };
            Ok(Some(ParentChannel::Owned(Arc::new(null))))
        }
        Capture::Pty => {
            actions.add_dup2(pty.follower.as_raw_fd(), target)?;
            Ok(Some(ParentChannel::Pty))
        }
        Capture::Pipe => {
            let mut fds = [0; 2];
            // SAFETY: pipe2 writes two fds into the provided array.
            cerr(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) })?;
            // SAFETY: pipe2 returned two open descriptors that nothing else owns.
            let (rx, tx) = unsafe { (Descriptor::from_raw_fd(fds[0]), Descriptor::from_raw_fd(fds[1])) };

            // dup2 clears close-on-exec on the child's copy; the original
            // write end closes at exec time, leaving the child as the only
            // writer.
            actions.add_dup2(tx.as_raw_fd(), target)?;
            child_fds.push(tx);

            Ok(Some(ParentChannel::Owned(Arc::new(rx))))
        }
    }
}

extern "C" {
    static environ: *const *mut libc::c_char;
}

/// posix_spawn interfaces report errors through their return value and
/// leave errno alone.
fn spawn_check(res: libc::c_int) -> io::Result<()> {
    if res == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(res))
    }
}

struct FileActions {
    raw: libc::posix_spawn_file_actions_t,
}

impl FileActions {
    fn new() -> io::Result<Self> {
        let mut raw = MaybeUninit::uninit();
        // SAFETY: init expects a pointer to uninitialized storage.
        spawn_check(unsafe { libc::posix_spawn_file_actions_init(raw.as_mut_ptr()) })?;
        // SAFETY: init returned 0, so the value is initialized.
        Ok(Self {
            raw: unsafe { raw.assume_init() },
        })
    }

    fn add_close(&mut self, fd: RawFd) -> io::Result<()> {
        // SAFETY: `self.raw` is initialized.
        spawn_check(unsafe { libc::posix_spawn_file_actions_addclose(&mut self.raw, fd) })
    }

    fn add_dup2(&mut self, fd: RawFd, target: RawFd) -> io::Result<()> {
        // SAFETY: `self.raw` is initialized.
        spawn_check(unsafe { libc::posix_spawn_file_actions_adddup2(&mut self.raw, fd, target) })
    }

    #[cfg(target_env = "gnu")]
    fn add_chdir(&mut self, path: &CStr) -> io::Result<()> {
        // SAFETY: `self.raw` is initialized and `path` is null-terminated.
        spawn_check(unsafe {
            libc::posix_spawn_file_actions_addchdir_np(&mut self.raw, path.as_ptr())
        })
    }

    #[cfg(not(target_env = "gnu"))]
    fn add_chdir(&mut self, _path: &CStr) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "changing the child's directory is not supported on this host",
        ))
    }
}

impl Drop for FileActions {
    fn drop(&mut self) {
        // SAFETY: `self.raw` is initialized; destroy errors are unactionable.
        unsafe { libc::posix_spawn_file_actions_destroy(&mut self.raw) };
    }
}

struct SpawnAttrs {
    raw: libc::posix_spawnattr_t,
}

impl SpawnAttrs {
    fn new() -> io::Result<Self> {
        let mut raw = MaybeUninit::uninit();
        // SAFETY: init expects a pointer to uninitialized storage.
        spawn_check(unsafe { libc::posix_spawnattr_init(raw.as_mut_ptr()) })?;
        // SAFETY: init returned 0, so the value is initialized.
        Ok(Self {
            raw: unsafe { raw.assume_init() },
        })
    }

    fn set_flags(&mut self, flags: libc::c_int) -> io::Result<()> {
        // SAFETY: `self.raw` is initialized.
        spawn_check(unsafe { libc::posix_spawnattr_setflags(&mut self.raw, flags as libc::c_short) })
    }

    fn set_pgroup(&mut self, pgroup: libc::pid_t) -> io::Result<()> {
        // SAFETY: `self.raw` is initialized.
        spawn_check(unsafe { libc::posix_spawnattr_setpgroup(&mut self.raw, pgroup) })
    }

    fn set_sigmask(&mut self, set: &SignalSet) -> io::Result<()> {
        // SAFETY: `self.raw` is initialized and the set outlives the call.
        spawn_check(unsafe { libc::posix_spawnattr_setsigmask(&mut self.raw, set.as_raw()) })
    }
}

impl Drop for SpawnAttrs {
    fn drop(&mut self) {
        // SAFETY: `self.raw` is initialized; destroy errors are unactionable.
        unsafe { libc::posix_spawnattr_destroy(&mut self.raw) };
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::CString;

    use pretty_assertions::assert_eq;

    use super::{Capture, ParentChannel, Runner, SpawnRequest};
    use crate::system::fd::Descriptor;
    use crate::system::term::PtyOptions;
    use crate::system::wait::{ChildEvent, Wait, WaitEvent, WaitOptions};

    fn sh_request<'a>(args: &'a [CString], stdout: Capture, stderr: Capture) -> SpawnRequest<'a> {
        SpawnRequest {
            program: c"/bin/sh",
            args,
            env: None,
            cwd: None,
            stdout,
            stderr,
            pty_options: PtyOptions::default(),
            signal_mask: None,
        }
    }

    fn sh_args(script: &str) -> Vec<CString> {
        vec![CString::new("-c").unwrap(), CString::new(script).unwrap()]
    }

    fn reap(runner: &Runner) -> ChildEvent {
        match runner.pid.wait(WaitOptions::changes()).unwrap() {
            WaitEvent::Child { pid, event } => {
                assert_eq!(pid, runner.pid);
                event
            }
            other => panic!("expected a child event, got {other:?}"),
        }
    }

    fn read_all(fd: &Descriptor) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0; 4096];
        loop {
            match fd.read(&mut buf) {
                Ok(0) => break,
                Ok(bytes) => out.extend_from_slice(&buf[..bytes]),
                Err(err) => panic!("read failed: {err}"),
            }
        }
        out
    }

    #[test]
    fn child_runs_in_its_own_process_group() {
        let args = sh_args("sleep 1");
        let runner = Runner::spawn(sh_request(&args, Capture::None, Capture::None)).unwrap();

        // SAFETY: getpgid/getpgrp cannot cause UB for any argument.
        let (child_pgid, parent_pgid) =
            unsafe { (libc::getpgid(runner.pid.get()), libc::getpgrp()) };
        assert_ne!(child_pgid, parent_pgid);
        // The child leads its own group.
        assert_eq!(child_pgid, runner.pid.get());

        crate::system::kill(runner.pid, libc::SIGKILL).unwrap();
        reap(&runner);
    }

    #[test]
    fn pipe_capture_reads_child_output() {
        let args = sh_args("echo out; echo err >&2");
        let runner = Runner::spawn(sh_request(&args, Capture::Pipe, Capture::Pipe)).unwrap();

        let Some(ParentChannel::Owned(stdout)) = &runner.stdout else {
            panic!("stdout should be an owned channel");
        };
        let Some(ParentChannel::Owned(stderr)) = &runner.stderr else {
            panic!("stderr should be an owned channel");
        };

        assert_eq!(read_all(stdout), b"out\n");
        assert_eq!(read_all(stderr), b"err\n");
        assert_eq!(reap(&runner), ChildEvent::Exited(0));
    }

    #[test]
    fn failed_spawn_reports_the_posix_spawn_error() {
        let args = vec![];
        let request = SpawnRequest {
            program: c"/does/not/exist",
            args: &args,
            env: None,
            cwd: None,
            stdout: Capture::Pipe,
            stderr: Capture::Pipe,
            pty_options: PtyOptions::default(),
            signal_mask: None,
        };
        let err = Runner::spawn(request).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn unrelated_parent_descriptors_stay_private() {
        let spawn_and_list = || {
            let args = sh_args("ls /proc/self/fd");
            let runner =
                Runner::spawn(sh_request(&args, Capture::Pipe, Capture::None)).unwrap();
            let Some(ParentChannel::Owned(stdout)) = &runner.stdout else {
                panic!("stdout should be an owned channel");
            };
            let listing = read_all(stdout);
            assert_eq!(reap(&runner), ChildEvent::Exited(0));
            listing
        };

        let baseline = spawn_and_list();

        // Pile up unrelated descriptors in the parent; the child must not
        // see any of them.
        let ballast: Vec<_> = (0..10)
            .map(|_| std::fs::File::open("/bin/sh").unwrap())
            .collect();
        let listing = spawn_and_list();
        drop(ballast);

        assert_eq!(listing, baseline);
    }

    #[test]
    fn null_capture_observes_nothing() {
        let args = sh_args("echo ignored");
        let runner = Runner::spawn(sh_request(&args, Capture::Null, Capture::Null)).unwrap();

        let Some(ParentChannel::Owned(stderr)) = &runner.stderr else {
            panic!("stderr should be an owned channel");
        };

        // Reading /dev/null yields end of file straight away.
        assert_eq!(stderr.read(&mut [0; 16]).unwrap(), 0);
        assert_eq!(reap(&runner), ChildEvent::Exited(0));
    }

    #[test]
    fn signal_mask_reaches_the_child() {
        // A child with SIGTERM masked survives a SIGTERM.
        let args = vec![CString::new("0.3").unwrap()];
        let mask = [libc::SIGTERM];
        let request = SpawnRequest {
            program: c"/bin/sleep",
            args: &args,
            env: None,
            cwd: None,
            stdout: Capture::None,
            stderr: Capture::None,
            pty_options: PtyOptions::default(),
            signal_mask: Some(&mask),
        };
        let runner = Runner::spawn(request).unwrap();

        crate::system::kill(runner.pid, libc::SIGTERM).unwrap();
        assert_eq!(reap(&runner), ChildEvent::Exited(0));
    }

    #[test]
    fn chdir_is_applied() {
        let args = sh_args("pwd");
        let mut request = sh_request(&args, Capture::Pipe, Capture::None);
        let cwd = c"/tmp";
        request.cwd = Some(cwd);
        let runner = Runner::spawn(request).unwrap();

        let Some(ParentChannel::Owned(stdout)) = &runner.stdout else {
            panic!("stdout should be an owned channel");
        };
        assert_eq!(read_all(stdout), b"/tmp\n");
        assert_eq!(reap(&runner), ChildEvent::Exited(0));
    }
}
