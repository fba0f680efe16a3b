use std::ffi::{CString, OsString};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use signal_hook::consts::{SIGCONT, SIGINT, SIGSTOP, SIGTERM};
use tokio::task;

use crate::error::Error;
use crate::exec::spawner::{Capture, ParentChannel, Runner, SpawnRequest};
use crate::exec::stream::{ByteStream, DEFAULT_CAPACITY};
use crate::exec::watcher::Watcher;
use crate::status::Status;
use crate::system::signal::SignalNumber;
use crate::system::term::{self, PtyOptions, TermSize};
use crate::system::ProcessId;

/// Per-run configuration for [`PtyProcess::run`].
///
/// The default captures both output streams on the child's terminal, leaves
/// the terminal options cooked and sets no signal mask.
#[derive(Debug, Default, Clone)]
pub struct RunConfig {
    pub stdout: Capture,
    pub stderr: Capture,
    pub pty_options: PtyOptions,
    /// Signals to block in the child, on top of whatever it inherits.
    pub signal_mask: Option<Vec<SignalNumber>>,
}

/// An interactive child process on its own pseudo-terminal.
///
/// Construction is cheap and infallible; every runtime error surfaces from
/// [`PtyProcess::run`] or the operations that follow it. The child is
/// placed in a new process group, its stdin is the terminal, and stdout/
/// stderr go wherever the [`RunConfig`] points them.
///
/// Dropping the value closes all descriptors the parent holds but does
/// *not* kill the child; call [`PtyProcess::terminate`] first if that is
/// what you want.
#[derive(Debug)]
pub struct PtyProcess {
    program: PathBuf,
    args: Vec<OsString>,
    env: Option<Vec<(OsString, OsString)>>,
    cwd: Option<PathBuf>,

    runner: Option<Runner>,
    watcher: Option<Watcher>,
    pty_stream: Option<ByteStream>,
    stdout_stream: Option<ByteStream>,
    stderr_stream: Option<ByteStream>,
    stdout_request: Option<Capture>,
    stderr_request: Option<Capture>,
}

impl PtyProcess {
    /// A process that will execute the given program.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: None,
            cwd: None,
            runner: None,
            watcher: None,
            pty_stream: None,
            stdout_stream: None,
            stderr_stream: None,
            stdout_request: None,
            stderr_request: None,
        }
    }

    /// A process constructed from a `file` URL.
    ///
    /// Strings without a scheme are taken as plain paths; any scheme other
    /// than `file` is rejected.
    pub fn from_url(url: &str) -> Result<Self, Error> {
        match url.split_once("://") {
            Some(("file", rest)) => {
                // Skip an optional authority, e.g. `file://localhost/bin/sh`.
                let path = match rest.find('/') {
                    Some(index) => &rest[index..],
                    None => "/",
                };
                Ok(Self::new(path))
            }
            Some((scheme, _)) => Err(Error::UnsupportedScheme(scheme.to_string())),
            None => Ok(Self::new(url)),
        }
    }

    /// The program this process will execute.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Append one argument.
    pub fn arg(&mut self, arg: impl Into<OsString>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set one environment variable for the child.
    ///
    /// Touching the environment at all switches the child from inheriting
    /// the parent environment to receiving exactly the provided entries.
    pub fn env(&mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> &mut Self {
        let key = key.into();
        let entries = self.env.get_or_insert_with(Vec::new);
        entries.retain(|(existing, _)| *existing != key);
        entries.push((key, value.into()));
        self
    }

    /// Set several environment variables for the child.
    pub fn envs<I, K, V>(&mut self, entries: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        for (key, value) in entries {
            self.env(key, value);
        }
        self
    }

    /// Give the child an empty environment.
    pub fn env_clear(&mut self) -> &mut Self {
        self.env = Some(Vec::new());
        self
    }

    /// Set the child's working directory.
    ///
    /// An empty path means the same as not setting one at all: the child
    /// inherits the parent's working directory.
    pub fn current_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Spawn the child and start supervising it.
    ///
    /// # Panics
    ///
    /// If the process was already run; that is a programming error, not a
    /// runtime condition.
    pub async fn run(&mut self, config: RunConfig) -> Result<(), Error> {
        assert!(
            self.runner.is_none(),
            "the child was already spawned; a PtyProcess runs once"
        );

        if let Err(err) = std::fs::metadata(&self.program) {
            return Err(if err.kind() == io::ErrorKind::NotFound {
                Error::FileNotFound(self.program.clone())
            } else {
                Error::Io(err)
            });
        }

        let program = cstring(self.program.as_os_str().as_bytes())?;
        let args = self
            .args
            .iter()
            .map(|arg| cstring(arg.as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;
        let env = match &self.env {
            Some(entries) => Some(
                entries
                    .iter()
                    .map(|(key, value)| {
                        let mut entry = key.as_bytes().to_vec();
                        entry.push(b'=');
                        entry.extend_from_slice(value.as_bytes());
                        cstring(&entry)
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            None => None,
        };
        // `chdir("")` would fail with ENOENT; an empty directory means
        // "inherit" just like an absent one.
        let cwd = match &self.cwd {
            Some(dir) if !dir.as_os_str().is_empty() => Some(cstring(dir.as_os_str().as_bytes())?),
            _ => None,
        };

        let stdout = config.stdout;
        let stderr = config.stderr;
        let pty_options = config.pty_options;
        let signal_mask = config.signal_mask;

        let runner = task::spawn_blocking(move || {
            Runner::spawn(SpawnRequest {
                program: &program,
                args: &args,
                env: env.as_deref(),
                cwd: cwd.as_deref(),
                stdout,
                stderr,
                pty_options,
                signal_mask: signal_mask.as_deref(),
            })
        })
        .await
        .map_err(|err| Error::Io(io::Error::new(io::ErrorKind::Other, err)))??;

        let watcher = Watcher::start(runner.pid)?;

        // One reader per owned descriptor; streams bound to the pty all
        // drain through the single terminal reader.
        self.pty_stream = Some(ByteStream::spawn(Arc::clone(&runner.pty), DEFAULT_CAPACITY));
        self.stdout_stream = owned_stream(&runner.stdout);
        self.stderr_stream = owned_stream(&runner.stderr);
        self.stdout_request = Some(stdout);
        self.stderr_request = Some(stderr);
        self.watcher = Some(watcher);
        self.runner = Some(runner);

        Ok(())
    }

    /// The child's pid, once it has been spawned.
    pub fn pid(&self) -> Option<ProcessId> {
        self.runner.as_ref().map(|runner| runner.pid)
    }

    /// Current lifecycle state of the child.
    pub async fn status(&self) -> Status {
        match &self.watcher {
            Some(watcher) => watcher.status(),
            None => Status::NotRunYet,
        }
    }

    /// Wait until the child exits or is killed, and return that terminal
    /// status. Fails with `ECHILD` if the child was lost to a forged
    /// SIGCHLD or a stolen wait.
    pub async fn wait_until_exit(&self) -> Result<Status, Error> {
        match &self.watcher {
            Some(watcher) => watcher.wait_until_exit().await.map_err(Error::Io),
            None => Err(Error::from_errno(libc::ESRCH)),
        }
    }

    /// Send `SIGTERM` to the child.
    pub async fn terminate(&self) -> Result<(), Error> {
        self.send_signal(SIGTERM)
    }

    /// Send `SIGINT` to the child.
    pub async fn interrupt(&self) -> Result<(), Error> {
        self.send_signal(SIGINT)
    }

    /// Send `SIGSTOP` to the child. The status changes once the stop is
    /// observed, not when this call returns.
    pub async fn suspend(&self) -> Result<(), Error> {
        self.send_signal(SIGSTOP)
    }

    /// Send `SIGCONT` to the child. The status changes once the continue
    /// is observed, not when this call returns.
    pub async fn resume(&self) -> Result<(), Error> {
        self.send_signal(SIGCONT)
    }

    /// Send an arbitrary signal to the child.
    pub fn send_signal(&self, signal: SignalNumber) -> Result<(), Error> {
        match &self.watcher {
            Some(watcher) => watcher.send_signal(signal).map_err(Error::Io),
            None => Err(Error::from_errno(libc::ESRCH)),
        }
    }

    /// The bytes the child writes to its terminal.
    ///
    /// # Panics
    ///
    /// If the process was not run yet, or the stream was already taken.
    pub fn pty_bytes(&mut self) -> ByteStream {
        assert!(self.runner.is_some(), "the child was not spawned yet");
        self.pty_stream
            .take()
            .expect("the terminal byte stream was already taken")
    }

    /// The bytes of the child's captured stdout.
    ///
    /// # Panics
    ///
    /// If stdout capture was not requested, or the stream was already
    /// taken. With [`Capture::Pty`] this is the terminal stream itself.
    pub fn stdout_bytes(&mut self) -> ByteStream {
        assert!(self.runner.is_some(), "the child was not spawned yet");
        match self.stdout_request {
            Some(Capture::Pty) => self.pty_bytes(),
            Some(Capture::Pipe) | Some(Capture::Null) => self
                .stdout_stream
                .take()
                .expect("the stdout byte stream was already taken"),
            Some(Capture::None) | None => panic!("stdout capture was not requested"),
        }
    }

    /// The bytes of the child's captured stderr.
    ///
    /// # Panics
    ///
    /// If stderr capture was not requested, or the stream was already
    /// taken. With [`Capture::Pty`] this is the terminal stream itself.
    pub fn stderr_bytes(&mut self) -> ByteStream {
        assert!(self.runner.is_some(), "the child was not spawned yet");
        match self.stderr_request {
            Some(Capture::Pty) => self.pty_bytes(),
            Some(Capture::Pipe) | Some(Capture::Null) => self
                .stderr_stream
                .take()
                .expect("the stderr byte stream was already taken"),
            Some(Capture::None) | None => panic!("stderr capture was not requested"),
        }
    }

    /// Write input to the child's terminal.
    pub fn write_pty(&self, mut bytes: &[u8]) -> Result<(), Error> {
        let Some(runner) = &self.runner else {
            return Err(Error::from_errno(libc::EBADF));
        };

        while !bytes.is_empty() {
            match runner.pty.write(bytes) {
                Ok(0) => {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "terminal accepted no bytes",
                    )))
                }
                Ok(written) => bytes = &bytes[written..],
                Err(err) => return Err(Error::Io(err)),
            }
        }

        Ok(())
    }

    /// The raw descriptor of the terminal's parent side.
    pub fn pty_fd(&self) -> Result<RawFd, Error> {
        match &self.runner {
            Some(runner) => Ok(runner.pty.as_raw_fd()),
            None => Err(Error::from_errno(libc::EBADF)),
        }
    }

    /// The raw descriptor backing the captured stdout.
    pub fn stdout_fd(&self) -> Result<RawFd, Error> {
        let runner = self.runner.as_ref().ok_or(Error::from_errno(libc::EBADF))?;
        channel_fd(&runner.stdout, &runner.pty)
    }

    /// The raw descriptor backing the captured stderr.
    pub fn stderr_fd(&self) -> Result<RawFd, Error> {
        let runner = self.runner.as_ref().ok_or(Error::from_errno(libc::EBADF))?;
        channel_fd(&runner.stderr, &runner.pty)
    }

    /// The current line-discipline options of the child's terminal.
    pub fn pty_options(&self) -> Result<PtyOptions, Error> {
        PtyOptions::from_fd(self.pty_fd()?).map_err(Error::Io)
    }

    /// Change the line-discipline options of the child's terminal.
    ///
    /// See [`PtyOptions::apply`] for the meaning of the two flags; passing
    /// neither applies the change immediately as well.
    pub fn set_pty_options(
        &self,
        options: PtyOptions,
        immediately: bool,
        drain_first: bool,
    ) -> Result<(), Error> {
        options
            .apply(self.pty_fd()?, immediately, drain_first)
            .map_err(Error::Io)
    }

    /// The window size of the child's terminal.
    pub fn term_size(&self) -> Result<TermSize, Error> {
        term::term_size(self.pty_fd()?).map_err(Error::Io)
    }

    /// Resize the child's terminal.
    pub fn set_term_size(&self, size: TermSize) -> Result<(), Error> {
        term::set_term_size(self.pty_fd()?, size).map_err(Error::Io)
    }
}

fn cstring(bytes: &[u8]) -> Result<CString, Error> {
    CString::new(bytes).map_err(|_| {
        Error::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "nul byte in path, argument or environment entry",
        ))
    })
}

fn owned_stream(channel: &Option<ParentChannel>) -> Option<ByteStream> {
    match channel {
        Some(ParentChannel::Owned(fd)) => {
            Some(ByteStream::spawn(Arc::clone(fd), DEFAULT_CAPACITY))
        }
        _ => None,
    }
}

fn channel_fd(channel: &Option<ParentChannel>, pty: &Arc<crate::system::fd::Descriptor>) -> Result<RawFd, Error> {
    match channel {
        Some(ParentChannel::Owned(fd)) => Ok(fd.as_raw_fd()),
        Some(ParentChannel::Pty) => Ok(pty.as_raw_fd()),
        None => Err(Error::from_errno(libc::EBADF)),
    }
}
