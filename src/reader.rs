//! The unified stream reader
//!
//! Every consumer-facing handle in this crate is a [`StreamReader`],
//! whatever produced it: a pipe, a fan-out child, a converted reader, a
//! merged reader, or a replayed in-memory array. Combinators consume
//! readers by value and hand back readers, so ownership always moves
//! strictly downstream.

use async_stream::stream;
use async_trait::async_trait;
use futures_core::Stream;

use crate::copy;
use crate::error::{StreamError, StreamResult};
use crate::merge::MergeReader;
use crate::pipe::PipeReceiver;

/// What kind of source is behind a [`StreamReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderKind {
    /// The consumer half of a pipe.
    Pipe,
    /// A finite in-memory sequence.
    Array,
    /// A fan-out child sharing one upstream.
    Copied,
    /// A lazily converted reader.
    Converted,
    /// An interleave of several readers.
    Merged,
}

/// Object-safe seam for reader kinds that erase a type parameter
/// (fan-out children erase the `Clone` bound, converted readers erase
/// their source element type).
#[async_trait]
pub(crate) trait DynReader<T>: Send {
    async fn recv(&mut self) -> StreamResult<T>;
    fn close(&mut self);
    fn kind(&self) -> ReaderKind;
}

pub(crate) enum ReaderState<T> {
    Pipe(PipeReceiver<T>),
    Array(ArrayReader<T>),
    Boxed(Box<dyn DynReader<T>>),
    Merge(MergeReader<T>),
}

/// Consumer handle over a typed stream.
///
/// The contract is the same for every kind: call [`recv`](Self::recv)
/// until it returns `Err(EndOfStream)`, and [`close`](Self::close) as soon
/// as no more items are wanted so the producer side can stop. Dropping a
/// reader closes it.
pub struct StreamReader<T> {
    pub(crate) state: ReaderState<T>,
}

impl<T> StreamReader<T> {
    /// A finite reader that replays `values` in order and then ends.
    pub fn from_vec(values: Vec<T>) -> StreamReader<T> {
        StreamReader {
            state: ReaderState::Array(ArrayReader {
                items: values.into_iter(),
                closed: false,
            }),
        }
    }

    /// Receive the next item, suspending until one is available or the
    /// stream ends. After `Err(EndOfStream)` every further call returns
    /// `Err(EndOfStream)` again.
    pub async fn recv(&mut self) -> StreamResult<T>
    where
        T: Send,
    {
        match &mut self.state {
            ReaderState::Pipe(receiver) => receiver.recv().await,
            ReaderState::Array(array) => array.recv(),
            ReaderState::Boxed(inner) => inner.recv().await,
            ReaderState::Merge(merged) => merged.recv().await,
        }
    }

    /// Signal that this consumer is done. Idempotent, non-blocking, and
    /// propagated upstream (a pipe writer sees `true` from its next send;
    /// a fan-out parent counts the close).
    pub fn close(&mut self) {
        match &mut self.state {
            ReaderState::Pipe(receiver) => receiver.close(),
            ReaderState::Array(array) => array.close(),
            ReaderState::Boxed(inner) => inner.close(),
            ReaderState::Merge(merged) => merged.close(),
        }
    }

    /// Which kind of source is behind this reader.
    pub fn kind(&self) -> ReaderKind {
        match &self.state {
            ReaderState::Pipe(_) => ReaderKind::Pipe,
            ReaderState::Array(_) => ReaderKind::Array,
            ReaderState::Boxed(inner) => inner.kind(),
            ReaderState::Merge(_) => ReaderKind::Merged,
        }
    }

    /// Fan this reader out into `n` children that each observe the full
    /// remaining sequence at their own pace.
    ///
    /// The reader is consumed: all further consumption must go through the
    /// children, and the upstream is closed once the last child closes.
    /// `copy(1)` hands the reader back unchanged.
    pub fn copy(self, n: usize) -> Vec<StreamReader<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        if n <= 1 {
            return vec![self];
        }
        copy::fan_out(self, n)
    }

    /// Drain the reader, returning every value plus the first non-end
    /// error encountered along the way.
    pub async fn collect(mut self) -> (Vec<T>, Option<StreamError>)
    where
        T: Send,
    {
        let mut values = Vec::new();
        let mut failure = None;
        loop {
            match self.recv().await {
                Ok(value) => values.push(value),
                Err(err) if err.is_end_of_stream() => break,
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }
        (values, failure)
    }

    /// Bridge into the futures ecosystem. The stream yields every item,
    /// error items included, and terminates where the reader would return
    /// `EndOfStream`. Dropping the stream closes the reader.
    pub fn into_stream(mut self) -> impl Stream<Item = StreamResult<T>> + Send
    where
        T: Send + 'static,
    {
        stream! {
            loop {
                match self.recv().await {
                    Err(err) if err.is_end_of_stream() => break,
                    item => yield item,
                }
            }
        }
    }
}

/// A finite in-memory sequence exposed as a reader.
pub(crate) struct ArrayReader<T> {
    items: std::vec::IntoIter<T>,
    closed: bool,
}

impl<T> ArrayReader<T> {
    fn recv(&mut self) -> StreamResult<T> {
        if self.closed {
            return Err(StreamError::EndOfStream);
        }
        match self.items.next() {
            Some(value) => Ok(value),
            None => Err(StreamError::EndOfStream),
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
