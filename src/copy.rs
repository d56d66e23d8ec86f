//! Fan-out: one upstream reader replayed to N independent children
//!
//! The replay buffer is a linked chain of elements, each materialized at
//! most once. A child at an already-materialized element reads it without
//! touching upstream; a child at the frontier races to initialize the next
//! element's cell, and whichever child wins becomes the puller while the
//! rest wait on the same cell and are all released when it fills. Elements
//! are reclaimed as the last child still referencing them moves past, so
//! memory is bounded by the spread between the slowest and fastest live
//! child.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OnceCell};

use crate::error::{StreamError, StreamResult};
use crate::reader::{DynReader, ReaderKind, ReaderState, StreamReader};

pub(crate) fn fan_out<T>(upstream: StreamReader<T>, n: usize) -> Vec<StreamReader<T>>
where
    T: Clone + Send + Sync + 'static,
{
    let group = Arc::new(CopyGroup {
        upstream: Mutex::new(upstream),
        total: n,
        closed_num: AtomicUsize::new(0),
    });
    let head = Arc::new(CopyElement::default());
    (0..n)
        .map(|_| StreamReader {
            state: ReaderState::Boxed(Box::new(CopyReader {
                group: Arc::clone(&group),
                elem: Some(Arc::clone(&head)),
                closed: false,
            })),
        })
        .collect()
}

struct CopyGroup<T> {
    /// The adopted upstream reader. The async mutex doubles as the puller
    /// slot: holding it is being the puller, and its waiters queue fairly.
    upstream: Mutex<StreamReader<T>>,
    total: usize,
    closed_num: AtomicUsize,
}

/// One position in the replay chain.
struct CopyElement<T> {
    cell: OnceCell<CopySlot<T>>,
}

impl<T> Default for CopyElement<T> {
    fn default() -> Self {
        CopyElement {
            cell: OnceCell::new(),
        }
    }
}

struct CopySlot<T> {
    item: StreamResult<T>,
    /// Present only when `item` is a value; errors and end-of-stream are
    /// terminal, so the chain stops there.
    next: Option<Arc<CopyElement<T>>>,
}

impl<T> Drop for CopyElement<T> {
    fn drop(&mut self) {
        // Unlink iteratively: a long reclaimed prefix must not recurse
        // element by element through nested drops.
        let mut next = self.cell.take().and_then(|slot| slot.next);
        while let Some(elem) = next {
            next = match Arc::try_unwrap(elem) {
                Ok(mut sole) => sole.cell.take().and_then(|slot| slot.next),
                Err(_) => None,
            };
        }
    }
}

struct CopyReader<T> {
    group: Arc<CopyGroup<T>>,
    /// This child's cursor: the element it will read next. `None` once the
    /// child went terminal (end-of-stream or a delivered error item).
    elem: Option<Arc<CopyElement<T>>>,
    closed: bool,
}

impl<T> CopyReader<T> {
    fn close_child(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.elem = None;
        let closed = self.group.closed_num.fetch_add(1, Ordering::AcqRel) + 1;
        if closed == self.group.total {
            log::trace!(
                "all {} fan-out children closed, closing upstream",
                self.group.total
            );
            // No child can be pulling anymore, so the slot is free; the
            // chain drop covers the pathological case where it is not.
            if let Ok(mut upstream) = self.group.upstream.try_lock() {
                upstream.close();
            }
        }
    }
}

#[async_trait]
impl<T> DynReader<T> for CopyReader<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn recv(&mut self) -> StreamResult<T> {
        if self.closed {
            return Err(StreamError::EndOfStream);
        }
        let elem = match &self.elem {
            Some(elem) => Arc::clone(elem),
            None => return Err(StreamError::EndOfStream),
        };
        let group = &self.group;
        let slot = elem
            .cell
            .get_or_init(|| async move {
                let mut upstream = group.upstream.lock().await;
                let item = upstream.recv().await;
                let next = match &item {
                    Ok(_) => Some(Arc::new(CopyElement::default())),
                    Err(_) => None,
                };
                CopySlot { item, next }
            })
            .await;
        match &slot.item {
            Ok(value) => {
                self.elem = slot.next.clone();
                Ok(value.clone())
            }
            Err(err) => {
                // Delivered once per child, end-of-stream thereafter.
                self.elem = None;
                Err(err.clone())
            }
        }
    }

    fn close(&mut self) {
        self.close_child();
    }

    fn kind(&self) -> ReaderKind {
        ReaderKind::Copied
    }
}

impl<T> Drop for CopyReader<T> {
    fn drop(&mut self) {
        self.close_child();
    }
}
