//! Process-global fan-out of SIGCHLD deliveries.
//!
//! The signal handler is installed once and stays for the lifetime of the
//! process. A dedicated thread drains the siginfo stream and routes each
//! delivery to the watcher that owns the named child. The registry never
//! touches the process signal mask, so other SIGCHLD consumers in the same
//! program keep working.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, OnceLock};

use signal_hook::consts::SIGCHLD;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::system::signal::{SignalHandler, SignalInfo, SignalStream};
use crate::system::ProcessId;

/// What a SIGCHLD delivery means for one subscribed watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SigchldNotice {
    /// The delivery names this watcher's child; an event is pending for it.
    Owned,
    /// The delivery names another live child. Standard signals coalesce, so
    /// an event for this watcher's child may be pending as well.
    Peek,
    /// The delivery was user-sent or names no child anyone is watching.
    Spurious,
}

type Registry = Arc<Mutex<HashMap<libc::pid_t, UnboundedSender<SigchldNotice>>>>;

static SUBSCRIBERS: OnceLock<Result<Registry, i32>> = OnceLock::new();

/// Start receiving SIGCHLD notices concerning the given child.
///
/// The first subscription installs the signal handler and spawns the
/// routing thread.
pub(crate) fn subscribe(pid: ProcessId) -> io::Result<UnboundedReceiver<SigchldNotice>> {
    let registry = match SUBSCRIBERS.get_or_init(start) {
        Ok(registry) => registry,
        Err(errno) => return Err(io::Error::from_raw_os_error(*errno)),
    };

    let (tx, rx) = unbounded_channel();
    registry.lock().unwrap().insert(pid.get(), tx);

    Ok(rx)
}

/// Stop routing notices for the given child. Idempotent.
pub(crate) fn unsubscribe(pid: ProcessId) {
    if let Some(Ok(registry)) = SUBSCRIBERS.get() {
        registry.lock().unwrap().remove(&pid.get());
    }
}

fn start() -> Result<Registry, i32> {
    let errno = |err: io::Error| err.raw_os_error().unwrap_or(libc::EIO);

    let mut stream = SignalStream::new().map_err(errno)?;
    let handler = SignalHandler::stream(SIGCHLD).map_err(errno)?;
    // The handler stays installed for the lifetime of the process; watchers
    // come and go underneath it.
    handler.forget();

    let registry: Registry = Arc::new(Mutex::new(HashMap::new()));

    let router = Arc::clone(&registry);
    std::thread::Builder::new()
        .name("sigchld-router".to_string())
        .spawn(move || loop {
            match stream.recv() {
                Ok(info) => route(&router, &info),
                Err(err) => {
                    log::warn!("cannot receive signal information: {err}");
                }
            }
        })
        .map_err(errno)?;

    Ok(registry)
}

fn route(registry: &Registry, info: &SignalInfo) {
    let subscribers = registry.lock().unwrap();

    if info.signal() == SIGCHLD && !info.is_user_signaled() {
        if let Some(tx) = subscribers.get(&info.pid().get()) {
            // The owner gets the delivery; everyone else double-checks their
            // own child in case the kernel merged deliveries.
            tx.send(SigchldNotice::Owned).ok();
            for (&pid, tx) in subscribers.iter() {
                if pid != info.pid().get() {
                    tx.send(SigchldNotice::Peek).ok();
                }
            }
        } else {
            // A child nobody here is watching (e.g. spawned by another part
            // of the program). Not an error, but worth a peek.
            for tx in subscribers.values() {
                tx.send(SigchldNotice::Peek).ok();
            }
        }
        return;
    }

    // Forged delivery, e.g. `kill(getpid(), SIGCHLD)` issued elsewhere in
    // the program. There is no way to tell which child it was meant for.
    log::debug!(
        "spurious SIGCHLD delivery from pid {}, notifying all watchers",
        info.pid()
    );
    for tx in subscribers.values() {
        tx.send(SigchldNotice::Spurious).ok();
    }
}
