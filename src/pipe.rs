//! Bounded single-producer / single-consumer pipe with two-sided close
//!
//! The primitive hand-off underneath every other reader in this crate.
//! A pipe of capacity zero is a rendezvous: a send completes only once a
//! receiver has arrived for it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::error::{StreamError, StreamResult};
use crate::reader::{ReaderState, StreamReader};

/// Create a bounded pipe, returning the producer and consumer halves.
///
/// `capacity` is the number of items that may sit in the buffer while the
/// reader lags; zero means synchronous hand-off. Either half may close at
/// any time: the writer observes a reader close as `true` from [`send`],
/// the reader observes a writer close as `EndOfStream` once drained.
///
/// [`send`]: StreamWriter::send
pub fn pipe<T>(capacity: usize) -> (StreamWriter<T>, StreamReader<T>) {
    let shared = Arc::new(PipeShared {
        capacity,
        state: Mutex::new(PipeState {
            buf: VecDeque::with_capacity(capacity),
            writer_closed: false,
            reader_closed: false,
            recv_parked: false,
            done: false,
        }),
        send_wake: Notify::new(),
        recv_wake: Notify::new(),
    });
    let writer = StreamWriter {
        shared: Some(Arc::clone(&shared)),
    };
    let reader = StreamReader {
        state: ReaderState::Pipe(PipeReceiver { shared }),
    };
    (writer, reader)
}

struct PipeState<T> {
    buf: VecDeque<StreamResult<T>>,
    writer_closed: bool,
    reader_closed: bool,
    /// The receiver is parked waiting for an item; a capacity-zero sender
    /// may hand off only while this holds.
    recv_parked: bool,
    /// The reader observed a terminal condition (end-of-stream, or an
    /// error item it already delivered).
    done: bool,
}

pub(crate) struct PipeShared<T> {
    capacity: usize,
    state: Mutex<PipeState<T>>,
    send_wake: Notify,
    recv_wake: Notify,
}

impl<T> PipeShared<T> {
    fn lock(&self) -> MutexGuard<'_, PipeState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Producer half of a pipe.
///
/// Dropping the writer closes it, so an abandoned producer can never wedge
/// the reader.
pub struct StreamWriter<T> {
    shared: Option<Arc<PipeShared<T>>>,
}

impl<T> StreamWriter<T> {
    /// Enqueue one item, suspending while the buffer is full and the reader
    /// is alive. Returns `true` once the reader has closed: the producer
    /// must stop sending. Calling after [`close`](Self::close) also returns
    /// `true`.
    pub async fn send(&mut self, item: StreamResult<T>) -> bool {
        let shared = match &self.shared {
            Some(shared) => shared,
            None => {
                log::debug!("send on a pipe writer that was already closed");
                return true;
            }
        };
        let mut pending = Some(item);
        loop {
            {
                let mut state = shared.lock();
                if state.reader_closed {
                    return true;
                }
                let has_room = if shared.capacity == 0 {
                    state.recv_parked && state.buf.is_empty()
                } else {
                    state.buf.len() < shared.capacity
                };
                if has_room {
                    if let Some(item) = pending.take() {
                        state.buf.push_back(item);
                    }
                    drop(state);
                    shared.recv_wake.notify_one();
                    return false;
                }
            }
            shared.send_wake.notified().await;
        }
    }

    /// Mark the producer side closed. Idempotent and non-blocking; the
    /// reader drains whatever is buffered and then sees `EndOfStream`.
    pub fn close(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.lock().writer_closed = true;
            shared.recv_wake.notify_one();
            log::trace!("pipe writer closed");
        }
    }
}

impl<T> Drop for StreamWriter<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Consumer half of a pipe; lives inside [`StreamReader`].
pub(crate) struct PipeReceiver<T> {
    shared: Arc<PipeShared<T>>,
}

impl<T> PipeReceiver<T> {
    pub(crate) async fn recv(&mut self) -> StreamResult<T> {
        loop {
            {
                let mut state = self.shared.lock();
                state.recv_parked = false;
                if state.done || state.reader_closed {
                    return Err(StreamError::EndOfStream);
                }
                if let Some(item) = state.buf.pop_front() {
                    if item.is_err() {
                        // An error item ends the stream once delivered.
                        state.done = true;
                    }
                    drop(state);
                    self.shared.send_wake.notify_one();
                    return item;
                }
                if state.writer_closed {
                    state.done = true;
                    return Err(StreamError::EndOfStream);
                }
                state.recv_parked = true;
                if self.shared.capacity == 0 {
                    // Invite a rendezvous sender over.
                    drop(state);
                    self.shared.send_wake.notify_one();
                }
            }
            self.shared.recv_wake.notified().await;
        }
    }

    pub(crate) fn close(&mut self) {
        let mut state = self.shared.lock();
        if !state.reader_closed {
            state.reader_closed = true;
            state.buf.clear();
            drop(state);
            self.shared.send_wake.notify_one();
            log::trace!("pipe reader closed");
        }
    }
}

impl<T> Drop for PipeReceiver<T> {
    fn drop(&mut self) {
        self.close();
    }
}
