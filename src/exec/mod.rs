//! Spawning and supervising the child process.
pub(crate) mod sigchld;
pub(crate) mod spawner;
pub(crate) mod stream;
pub(crate) mod watcher;
