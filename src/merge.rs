//! Fair interleave of several readers into one
//!
//! Each receive races every live input and returns the first item to
//! arrive; the poll origin rotates so a continuously-ready input cannot
//! starve the others. Inputs drop out of the race as they reach
//! end-of-stream, and the merged reader ends only when the last one has.

use futures_util::future::select_all;

use crate::error::{StreamError, StreamResult};
use crate::reader::{ReaderState, StreamReader};

/// Interleave `readers` into a single reader.
///
/// Order within each input is preserved; order across inputs is
/// unspecified. Error items are forwarded like values and do not end the
/// merge. A single-element vector is handed back unchanged; an empty one
/// yields an immediately-ended reader.
pub fn merge<T>(mut readers: Vec<StreamReader<T>>) -> StreamReader<T> {
    if readers.len() == 1 {
        return readers.remove(0);
    }
    StreamReader {
        state: ReaderState::Merge(MergeReader {
            inputs: readers,
            start: 0,
        }),
    }
}

pub(crate) struct MergeReader<T> {
    inputs: Vec<StreamReader<T>>,
    /// Rotating poll origin; bumped on every delivered item.
    start: usize,
}

impl<T> MergeReader<T> {
    pub(crate) async fn recv(&mut self) -> StreamResult<T>
    where
        T: Send,
    {
        loop {
            if self.inputs.is_empty() {
                return Err(StreamError::EndOfStream);
            }
            let offset = self.start % self.inputs.len();
            let mut entries: Vec<_> = self.inputs.iter_mut().enumerate().collect();
            entries.rotate_left(offset);
            let races: Vec<_> = entries
                .into_iter()
                .map(|(index, input)| Box::pin(async move { (index, input.recv().await) }))
                .collect();
            let ((index, item), _, _) = select_all(races).await;
            match item {
                Err(err) if err.is_end_of_stream() => {
                    log::trace!(
                        "merge input {} drained, {} remaining",
                        index,
                        self.inputs.len() - 1
                    );
                    self.inputs.swap_remove(index);
                }
                item => {
                    self.start = self.start.wrapping_add(1);
                    return item;
                }
            }
        }
    }

    pub(crate) fn close(&mut self) {
        for input in &mut self.inputs {
            input.close();
        }
        self.inputs.clear();
    }
}
