use std::io;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio::task;

use crate::cutils::was_interrupted;
use crate::exec::sigchld::{self, SigchldNotice};
use crate::status::Status;
use crate::system::signal::{signal_name, SignalNumber};
use crate::system::wait::{ChildEvent, Wait, WaitEvent, WaitOptions};
use crate::system::{kill, ProcessId};

/// Supervises a single child: turns SIGCHLD deliveries into [`Status`]
/// transitions and resolves the queue of exit waiters.
///
/// All state lives behind one mutex; the background task, status reads and
/// waiter registration all serialize through it.
#[derive(Debug)]
pub(crate) struct Watcher {
    pid: ProcessId,
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    pid: ProcessId,
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    status: Status,
    /// Set exactly once: either the terminal status or the errno of an
    /// unrecoverable wait failure. Later waiters resolve from here.
    outcome: Option<Result<Status, i32>>,
    waiters: Vec<oneshot::Sender<Result<Status, i32>>>,
}

impl Watcher {
    /// Subscribe to SIGCHLD for `pid` and start the supervision task.
    pub(crate) fn start(pid: ProcessId) -> io::Result<Self> {
        let notices = sigchld::subscribe(pid)?;

        let shared = Arc::new(Shared {
            pid,
            state: Mutex::new(State {
                status: Status::Running(pid),
                outcome: None,
                waiters: Vec::new(),
            }),
        });

        task::spawn(watch(Arc::clone(&shared), notices));

        Ok(Self { pid, shared })
    }

    /// Current status of the child.
    ///
    /// While the child is suspended, stop/continue notifications are not
    /// reliably redelivered on every host, so each read peeks for a pending
    /// state change first.
    pub(crate) fn status(&self) -> Status {
        let status = self.shared.state.lock().unwrap().status;

        if let Status::Suspended(_) = status {
            self.shared.poll_pending();
            return self.shared.state.lock().unwrap().status;
        }

        status
    }

    /// Send a signal to the child.
    ///
    /// Note that `SIGSTOP`/`SIGCONT` do not transition the status by
    /// themselves; the transition lands when the resulting child event is
    /// observed.
    pub(crate) fn send_signal(&self, signal: SignalNumber) -> io::Result<()> {
        if self.shared.state.lock().unwrap().status.is_terminal() {
            return Err(io::Error::from_raw_os_error(libc::ESRCH));
        }

        log::debug!("sending {} to {}", signal_name(signal), self.pid);
        kill(self.pid, signal)
    }

    /// Wait until the child reaches a terminal state.
    ///
    /// Fails with the latched error if the watcher lost track of the child
    /// (e.g. a forged SIGCHLD or a stolen wait).
    pub(crate) async fn wait_until_exit(&self) -> io::Result<Status> {
        let waiter = {
            let mut state = self.shared.state.lock().unwrap();
            if let Some(outcome) = state.outcome {
                return outcome.map_err(io::Error::from_raw_os_error);
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);
            rx
        };

        match waiter.await {
            Ok(outcome) => outcome.map_err(io::Error::from_raw_os_error),
            // The supervision task was torn down without resolving us.
            Err(_) => Err(io::Error::from_raw_os_error(libc::ECHILD)),
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        // Idempotent; ends the supervision task if it is still running.
        sigchld::unsubscribe(self.pid);
    }
}

async fn watch(shared: Arc<Shared>, mut notices: UnboundedReceiver<SigchldNotice>) {
    // The child may have changed state before our subscription was in
    // place; catch up before listening.
    if shared.poll_pending() {
        return;
    }

    while let Some(notice) = notices.recv().await {
        let done = match notice {
            SigchldNotice::Owned => shared.wait_blocking().await,
            SigchldNotice::Peek => shared.poll_pending(),
            SigchldNotice::Spurious => {
                shared.fail(libc::ECHILD);
                true
            }
        };

        if done {
            break;
        }
    }
}

impl Shared {
    /// Consume the event a SIGCHLD delivery announced for our child.
    /// Returns `true` once the watcher is finished.
    async fn wait_blocking(&self) -> bool {
        let pid = self.pid;
        let wait = task::spawn_blocking(move || loop {
            match pid.wait(WaitOptions::changes()) {
                Err(err) if was_interrupted(&err) => {}
                other => break other,
            }
        });

        match wait.await {
            Ok(Ok(WaitEvent::Child { pid, event })) => self.apply(pid, event, false),
            // Cannot happen without WNOHANG, but treat it as a no-op.
            Ok(Ok(WaitEvent::NoChange)) => false,
            Ok(Ok(WaitEvent::Unexpected)) => {
                self.fail(libc::ECHILD);
                true
            }
            Ok(Err(err)) => {
                self.fail(err.raw_os_error().unwrap_or(libc::ECHILD));
                true
            }
            Err(join_err) => {
                log::warn!("wait task for {} failed: {join_err}", self.pid);
                self.fail(libc::ECHILD);
                true
            }
        }
    }

    /// Non-blocking peek for a state change whose SIGCHLD we may have
    /// missed. Returns `true` once the watcher is finished.
    fn poll_pending(&self) -> bool {
        if self.state.lock().unwrap().outcome.is_some() {
            return true;
        }

        match self.pid.wait(WaitOptions::changes().no_hang().keep_pending()) {
            Ok(WaitEvent::NoChange) => false,
            Ok(WaitEvent::Child { pid, event }) => self.apply(pid, event, true),
            Ok(WaitEvent::Unexpected) => {
                self.fail(libc::ECHILD);
                true
            }
            Err(err) if err.raw_os_error() == Some(libc::ECHILD) => {
                // The consuming wait on the background task may have reaped
                // the child between our outcome check and this peek; its
                // terminal status is still in flight. That task alone
                // decides whether the child was truly lost.
                self.state.lock().unwrap().outcome.is_some()
            }
            Err(err) => {
                self.fail(err.raw_os_error().unwrap_or(libc::ECHILD));
                true
            }
        }
    }

    /// Drive the state machine with one child event. Returns `true` once
    /// the watcher is finished.
    fn apply(&self, pid: ProcessId, event: ChildEvent, peeked: bool) -> bool {
        let terminal = match event {
            ChildEvent::Stopped(signal) => {
                log::debug!("{} was stopped by {}", pid, signal_name(signal));
                let mut state = self.state.lock().unwrap();
                if !state.status.is_terminal() {
                    state.status = Status::Suspended(pid);
                }
                return false;
            }
            ChildEvent::Continued => {
                log::debug!("{pid} continued execution");
                let mut state = self.state.lock().unwrap();
                if !state.status.is_terminal() {
                    state.status = Status::Running(pid);
                }
                return false;
            }
            ChildEvent::Exited(code) => {
                log::debug!("{pid} exited with status code {code}");
                Status::Exited(code)
            }
            ChildEvent::Killed { signal, .. } => {
                log::debug!("{} was terminated by {}", pid, signal_name(signal));
                Status::UncaughtSignal(signal)
            }
        };

        if peeked {
            // The peek left the event queued; reap the child for real.
            self.pid.wait(WaitOptions::changes().no_hang()).ok();
        }

        self.finish(Ok(terminal));
        true
    }

    fn fail(&self, errno: i32) {
        log::warn!(
            "watcher for {} giving up: {}",
            self.pid,
            io::Error::from_raw_os_error(errno)
        );
        self.finish(Err(errno));
    }

    /// Latch the outcome, resolve every pending waiter and end the SIGCHLD
    /// subscription. Only the first call has any effect.
    fn finish(&self, outcome: Result<Status, i32>) {
        let waiters = {
            let mut state = self.state.lock().unwrap();
            if state.outcome.is_some() {
                return;
            }

            state.outcome = Some(outcome);
            if let Ok(status) = outcome {
                state.status = status;
            }

            std::mem::take(&mut state.waiters)
        };

        for waiter in waiters {
            waiter.send(outcome).ok();
        }

        sigchld::unsubscribe(self.pid);
    }
}
