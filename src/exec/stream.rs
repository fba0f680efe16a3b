use std::io;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task;

use crate::system::fd::Descriptor;

/// Nominal upper bound for the bytes buffered by one stream. This is a
/// ceiling, not an allocation; reads go through a small working buffer.
pub(crate) const DEFAULT_CAPACITY: usize = 1 << 30;

const WORKING_BUFFER: usize = 4096;

/// An asynchronous, single-pass sequence of the bytes read from a
/// descriptor.
///
/// A background task performs the blocking reads and hands chunks over a
/// bounded channel, so consuming the stream never blocks an async worker.
/// Dropping the stream closes the channel and the task stops at its next
/// read boundary.
#[derive(Debug)]
pub struct ByteStream {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
    chunk: Vec<u8>,
    pos: usize,
    failed: bool,
}

impl ByteStream {
    pub(crate) fn spawn(fd: Arc<Descriptor>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(1);

        task::spawn_blocking(move || {
            let mut buf = vec![0; capacity.min(WORKING_BUFFER)];
            loop {
                match fd.read(&mut buf) {
                    Ok(0) => break,
                    Ok(bytes) => {
                        if tx.blocking_send(Ok(buf[..bytes].to_vec())).is_err() {
                            // The consumer is gone.
                            break;
                        }
                    }
                    Err(err) => {
                        tx.blocking_send(Err(err)).ok();
                        break;
                    }
                }
            }
        });

        Self {
            rx,
            chunk: Vec::new(),
            pos: 0,
            failed: false,
        }
    }

    /// The next byte of the stream.
    ///
    /// Returns `None` once the descriptor reaches end of file, and also on
    /// every call after a read error has been yielded.
    pub async fn next(&mut self) -> Option<io::Result<u8>> {
        if self.failed {
            return None;
        }

        while self.pos == self.chunk.len() {
            match self.rx.recv().await {
                Some(Ok(chunk)) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                Some(Err(err)) => {
                    self.failed = true;
                    return Some(Err(err));
                }
                None => return None,
            }
        }

        let byte = self.chunk[self.pos];
        self.pos += 1;
        Some(Ok(byte))
    }
}
