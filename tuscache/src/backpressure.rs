//! Caps how many buffered chunks an upload may have waiting to be flushed.
//!
//! Each sealed chunk holds one permit from a fair semaphore until its flush succeeds.  A write
//! that needs a new permit while all of them are held waits, and waiters are admitted in the
//! order they arrived.
use std::sync::Arc;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

/// Outcome of waiting for a chunk slot
#[derive(Debug)]
pub(crate) enum Admission {
    Granted(OwnedSemaphorePermit),

    /// A flush failed while waiting.  The held chunks will never be released without a retry, so
    /// the caller has to retry the flush before waiting again.
    FlushFailed,

    /// The upload was removed or evicted while waiting
    Closed,
}

#[derive(Debug)]
pub(crate) struct Backpressure {
    slots: Arc<Semaphore>,
    flush_failed: Notify,
}

impl Backpressure {
    pub fn new(max_pending_chunks: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_pending_chunks)),
            flush_failed: Notify::new(),
        }
    }

    /// Wait for a free chunk slot.
    ///
    /// `has_failed` reports whether the upload is currently in the failed state; it's checked
    /// before waiting so a failure which happened before this call isn't missed.
    pub async fn admit(&self, has_failed: impl Fn() -> bool) -> Admission {
        let notified = self.flush_failed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if has_failed() {
            return Admission::FlushFailed;
        }

        tokio::select! {
            permit = self.slots.clone().acquire_owned() => match permit {
                Ok(permit) => Admission::Granted(permit),
                Err(_) => Admission::Closed,
            },
            _ = notified => Admission::FlushFailed,
        }
    }

    /// Wake any writer waiting in [`Self::admit`] so it can retry the failed flush
    pub fn notify_flush_failed(&self) {
        self.flush_failed.notify_waiters();
    }

    /// Permanently refuse new admissions, waking everyone who is waiting
    pub fn close(&self) {
        self.slots.close();
    }

    #[cfg(test)]
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}
