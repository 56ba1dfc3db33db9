//! Path queue - unbounded FIFO of directories awaiting expansion
//!
//! Workers pop an item, expand it (which may push children) and then call
//! [`PathQueue::finish`]. The queue counts every pushed item as pending
//! until it is finished; when the count drops to zero nothing can push
//! anymore, so the queue closes itself and wakes every waiter.
//!
//! ## Design Notes
//!
//! - `push` never blocks; producers are the workers themselves, so a
//!   bounded queue could deadlock the pool.
//! - State lives under one `std::sync::Mutex` that is never held across an
//!   `.await`. Wake-ups go through `tokio::sync::Notify`.
//! - `shutdown` discards queued items and subtracts them from the pending
//!   count. Items already taken by workers stay pending until finished.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use strmsync_core::domain::PathQueueItem;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::SyncError;

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<PathQueueItem>,
    /// Pushed but not yet finished
    pending: usize,
    closed: bool,
}

/// Growing work queue with pending-count termination
#[derive(Debug, Default)]
pub struct PathQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl PathQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues a directory. Returns `false` once the queue is closed.
    pub fn push(&self, item: PathQueueItem) -> bool {
        {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            state.items.push_back(item);
            state.pending += 1;
        }
        self.notify.notify_one();
        true
    }

    /// Waits for the next item.
    ///
    /// Returns `None` when the queue is closed or `cancel` fires.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<PathQueueItem> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = &mut notified => {}
            }
        }
    }

    /// Marks one popped item as done and returns the remaining pending count.
    ///
    /// Closes the queue when the count reaches zero.
    pub fn finish(&self) -> Result<usize, SyncError> {
        let remaining = {
            let mut state = self.lock();
            if state.pending == 0 {
                return Err(SyncError::QueueAccounting(
                    "finish called with no pending items".to_string(),
                ));
            }
            state.pending -= 1;
            if state.pending == 0 {
                state.closed = true;
            }
            state.pending
        };

        if remaining == 0 {
            debug!("Path queue drained");
            self.notify.notify_waiters();
        }
        Ok(remaining)
    }

    /// Discards queued items, closes the queue and wakes every waiter.
    ///
    /// Returns how many items were discarded.
    pub fn shutdown(&self) -> usize {
        let discarded = {
            let mut state = self.lock();
            let discarded = state.items.len();
            state.items.clear();
            state.pending = state.pending.saturating_sub(discarded);
            state.closed = true;
            discarded
        };
        self.notify.notify_waiters();
        if discarded > 0 {
            debug!(discarded, "Path queue shut down with items waiting");
        }
        discarded
    }

    pub fn pending(&self) -> usize {
        self.lock().pending
    }

    /// Items waiting to be popped
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
