//! Lazy per-element conversion with filtering
//!
//! A converted reader pulls from its source one element at a time and
//! applies the closure on each receive. The closure may emit a value,
//! drop the element (`Err(NoValue)`), or fail the element; a failed
//! element surfaces as that receive's error while the stream keeps going.

use async_trait::async_trait;

use crate::error::StreamResult;
use crate::reader::{DynReader, ReaderKind, ReaderState, StreamReader};

/// Wrap `source` with a per-element transform.
///
/// Upstream end-of-stream and upstream error items are forwarded
/// unchanged. A transform returning `Err(NoValue)` silently skips to the
/// next element; any other transform error is per-element and does not
/// terminate the stream. Closing the converted reader closes the source.
pub fn convert<A, B, F>(source: StreamReader<A>, f: F) -> StreamReader<B>
where
    A: Send + 'static,
    B: Send + 'static,
    F: FnMut(A) -> StreamResult<B> + Send + 'static,
{
    StreamReader {
        state: ReaderState::Boxed(Box::new(ConvertReader { source, f })),
    }
}

struct ConvertReader<A, F> {
    source: StreamReader<A>,
    f: F,
}

#[async_trait]
impl<A, B, F> DynReader<B> for ConvertReader<A, F>
where
    A: Send + 'static,
    B: Send + 'static,
    F: FnMut(A) -> StreamResult<B> + Send + 'static,
{
    async fn recv(&mut self) -> StreamResult<B> {
        loop {
            let value = match self.source.recv().await {
                Ok(value) => value,
                Err(err) => return Err(err),
            };
            match (self.f)(value) {
                Err(err) if err.is_no_value() => continue,
                item => return item,
            }
        }
    }

    fn close(&mut self) {
        self.source.close();
    }

    fn kind(&self) -> ReaderKind {
        ReaderKind::Converted
    }
}
