//! Spawn and supervise interactive child processes on a pseudo-terminal.
//!
//! The crate drives command-line programs the way a user at a terminal
//! would: the child gets a fresh pty as its standard input (and, by
//! default, output), its lifecycle is tracked through SIGCHLD, and its
//! output arrives as asynchronous byte streams that never block a runtime
//! worker.
//!
//! ```no_run
//! use ptyspawn::{PtyProcess, RunConfig, Status};
//!
//! # async fn demo() -> Result<(), ptyspawn::Error> {
//! let mut shell = PtyProcess::new("/bin/sh");
//! shell.arg("-c").arg("echo hello");
//! shell.run(RunConfig::default()).await?;
//!
//! let mut output = shell.pty_bytes();
//! while let Some(byte) = output.next().await {
//!     print!("{}", byte? as char);
//! }
//!
//! assert_eq!(shell.wait_until_exit().await?, Status::Exited(0));
//! # Ok(())
//! # }
//! ```
//!
//! Suspending, resuming and signalling work while the child runs;
//! [`PtyProcess::status`] reflects every observed transition. Dropping a
//! [`PtyProcess`] releases the parent's descriptors but never kills the
//! child.

#![cfg(unix)]

mod cutils;
mod error;
mod exec;
mod process;
mod status;
mod system;

pub use error::Error;
pub use exec::spawner::Capture;
pub use exec::stream::ByteStream;
pub use process::{PtyProcess, RunConfig};
pub use status::Status;
pub use system::signal::{signal_name, SignalNumber};
pub use system::term::{PtyOptions, TermSize};
pub use system::ProcessId;
