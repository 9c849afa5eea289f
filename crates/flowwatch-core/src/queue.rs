//! Bounded Queue
//!
//! Single-consumer bounded channel used at both pipeline boundaries.
//!
//! | Operation | Full queue | Closed queue |
//! |-----------|------------|--------------|
//! | [`QueueSender::send`] | waits (async) | `Err(Closed)` |
//! | [`QueueSender::blocking_send`] | blocks the thread | `Err(Closed)` |
//! | [`QueueSender::try_push`] | `Err(Full)` | `Err(Closed)` |
//! | [`QueueReceiver::recv`] | - | `None` once drained |
//!
//! The queue closes when every sender is dropped or the receiver is
//! dropped/closed.

use std::fmt;
use tokio::sync::mpsc;

/// Rejected item plus the reason
#[derive(Debug, PartialEq, Eq)]
pub enum QueueError<T> {
    /// Queue at capacity
    Full(T),
    /// Receiver gone
    Closed(T),
}

impl<T> fmt::Display for QueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => write!(f, "queue full"),
            Self::Closed(_) => write!(f, "queue closed"),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for QueueError<T> {}

impl<T> QueueError<T> {
    /// Take back the rejected item
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Closed(item) => item,
        }
    }
}

/// Create a bounded queue with room for `capacity` items
///
/// # Panics
/// Panics if `capacity` is zero.
pub fn bounded<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (QueueSender { inner: tx }, QueueReceiver { inner: rx })
}

/// Producer half (cloneable)
#[derive(Debug)]
pub struct QueueSender<T> {
    inner: mpsc::Sender<T>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    /// Enqueue, waiting for room while the queue is full
    pub async fn send(&self, item: T) -> Result<(), QueueError<T>> {
        self.inner
            .send(item)
            .await
            .map_err(|mpsc::error::SendError(item)| QueueError::Closed(item))
    }

    /// Enqueue from a non-async thread, blocking while the queue is full
    ///
    /// # Panics
    /// Panics when called from inside an async execution context.
    pub fn blocking_send(&self, item: T) -> Result<(), QueueError<T>> {
        self.inner
            .blocking_send(item)
            .map_err(|mpsc::error::SendError(item)| QueueError::Closed(item))
    }

    /// Enqueue without waiting
    pub fn try_push(&self, item: T) -> Result<(), QueueError<T>> {
        self.inner.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(item) => QueueError::Full(item),
            mpsc::error::TrySendError::Closed(item) => QueueError::Closed(item),
        })
    }

    /// Free slots right now
    pub fn available(&self) -> usize {
        self.inner.capacity()
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.inner.max_capacity()
    }

    /// Whether the receiver is gone
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Consumer half
#[derive(Debug)]
pub struct QueueReceiver<T> {
    inner: mpsc::Receiver<T>,
}

impl<T> QueueReceiver<T> {
    /// Next item, waiting while empty; `None` once closed and drained
    pub async fn recv(&mut self) -> Option<T> {
        self.inner.recv().await
    }

    /// Next item if one is ready
    pub fn try_recv(&mut self) -> Option<T> {
        self.inner.try_recv().ok()
    }

    /// Stop accepting items; already queued items can still be received
    pub fn close(&mut self) {
        self.inner.close();
    }
}
