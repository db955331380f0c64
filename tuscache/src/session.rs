//! In-memory state of one in-progress upload.
use crate::backpressure::Backpressure;
use crate::buffer::{Segment, SegmentWriter};
use crate::metadata::UploadMetadata;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Where an upload is in its lifecycle.
///
/// ```text
/// Receiving -> Flushing -> Receiving ... -> Finalizing -> Completed
///                 |
///                 +-> Failed -> (retry) -> Flushing
///
/// Receiving | Flushing | Failed -> Aborted
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Accepting writes.  Some data may be buffered locally.
    Receiving,

    /// A flush to object storage is in progress.  Writes are still accepted.
    Flushing,

    /// The last flush failed.  Its data is still buffered, and the next write retries it.
    Failed,

    /// The last byte has arrived and the upload is being completed in object storage.
    Finalizing,

    Completed,

    /// Removed, either explicitly or by the sweeper
    Aborted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

/// State owned by whoever is appending to the buffer.  Guarded by [`UploadSession::writer`].
#[derive(Debug, Default)]
pub(crate) struct WriterState {
    /// The segment receiving writes, if any
    pub active: Option<SegmentWriter>,

    /// Sequence number of the next segment
    pub next_seq: u64,
}

/// State owned by whoever is talking to object storage.  Guarded by [`UploadSession::flusher`].
///
/// Holding this lock is what serializes flushes, finalization, and eviction of an upload.
#[derive(Debug)]
pub(crate) struct FlusherState {
    /// The persisted record of this upload.  Kept in sync with the metadata store.
    pub metadata: UploadMetadata,

    /// `metadata` has changes that haven't been saved yet
    pub metadata_dirty: bool,

    /// Number of the last part uploaded, 0 if none
    pub last_part_number: u32,

    /// The multipart upload has been completed remotely.  The metadata may not say so yet.
    pub object_completed: bool,
}

impl FlusherState {
    pub fn incomplete_part_size(&self) -> u64 {
        self.metadata.incomplete_part_size()
    }
}

/// Counters and flags that are read without taking either async lock
#[derive(Debug)]
struct Status {
    state: SessionState,
    confirmed: u64,
    buffered: u64,
    pending_chunks: usize,
    declared_size: Option<u64>,
    last_activity: Instant,
}

/// One in-progress upload.
///
/// Locks are always taken in the order `writer` then `flusher`, and the std mutexes are never
/// held across an await.
#[derive(Debug)]
pub(crate) struct UploadSession {
    id: String,

    pub writer: tokio::sync::Mutex<WriterState>,
    pub flusher: tokio::sync::Mutex<FlusherState>,
    pub backpressure: Backpressure,

    /// Sealed segments waiting to be flushed, oldest first
    queue: Mutex<VecDeque<Segment>>,
    status: Mutex<Status>,
}

impl UploadSession {
    /// A session for an upload which nothing has been flushed for yet
    pub fn new(metadata: UploadMetadata, max_pending_chunks: usize) -> Self {
        Self::resume(metadata, 0, 0, max_pending_chunks)
    }

    /// A session for an upload which already has `confirmed` bytes in object storage, in
    /// `last_part_number` parts plus whatever incomplete part `metadata` records
    pub fn resume(
        metadata: UploadMetadata,
        confirmed: u64,
        last_part_number: u32,
        max_pending_chunks: usize,
    ) -> Self {
        Self {
            id: metadata.id.clone(),
            writer: tokio::sync::Mutex::new(WriterState::default()),
            backpressure: Backpressure::new(max_pending_chunks),
            queue: Mutex::new(VecDeque::new()),
            status: Mutex::new(Status {
                state: SessionState::Receiving,
                confirmed,
                buffered: 0,
                pending_chunks: 0,
                declared_size: metadata.size,
                last_activity: Instant::now(),
            }),
            flusher: tokio::sync::Mutex::new(FlusherState {
                metadata,
                metadata_dirty: false,
                last_part_number,
                object_completed: false,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Segment>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        self.status().state
    }

    /// Bytes accepted so far, flushed or not.  This is the offset clients see.
    pub fn offset(&self) -> u64 {
        let status = self.status();
        status.confirmed + status.buffered
    }

    /// Bytes durably stored in object storage
    pub fn confirmed(&self) -> u64 {
        self.status().confirmed
    }

    pub fn declared_size(&self) -> Option<u64> {
        self.status().declared_size
    }

    pub fn set_declared_size(&self, size: u64) {
        self.status().declared_size = Some(size);
    }

    pub fn pending_chunks(&self) -> usize {
        self.status().pending_chunks
    }

    pub fn touch(&self) {
        self.status().last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.status().last_activity.elapsed()
    }

    /// Everything declared has been flushed, so the upload only needs completing
    pub fn fully_confirmed(&self) -> bool {
        let status = self.status();
        status.buffered == 0 && status.declared_size == Some(status.confirmed)
    }

    /// Record `bytes` newly appended to the buffer
    pub fn accept(&self, bytes: u64) {
        self.status().buffered += bytes;
    }

    /// Forget `bytes` previously accepted into the buffer and never flushed
    pub fn unaccept(&self, bytes: u64) {
        let mut status = self.status();
        status.buffered = status.buffered.saturating_sub(bytes);
    }

    pub fn enqueue(&self, segment: Segment) {
        self.queue().push_back(segment);
        self.status().pending_chunks += 1;
    }

    /// Take the oldest sealed segment to flush it.  It still counts as pending until
    /// [`Self::confirm`] or [`Self::requeue`].
    pub fn next_segment(&self) -> Option<Segment> {
        self.queue().pop_front()
    }

    /// Put back a segment whose flush failed, so it's the next one flushed
    pub fn requeue(&self, segment: Segment) {
        self.queue().push_front(segment);
    }

    /// `bytes` from a flushed segment are now in object storage
    pub fn confirm(&self, bytes: u64) {
        let mut status = self.status();
        status.confirmed += bytes;
        status.buffered = status.buffered.saturating_sub(bytes);
        status.pending_chunks = status.pending_chunks.saturating_sub(1);
    }

    /// Take the newest sealed segment, to shrink or drop it
    pub fn take_last_segment(&self) -> Option<Segment> {
        self.queue().pop_back()
    }

    pub fn restore_last_segment(&self, segment: Segment) {
        self.queue().push_back(segment);
    }

    /// A pending segment was dropped without being flushed
    pub fn forget_segment(&self) {
        let mut status = self.status();
        status.pending_chunks = status.pending_chunks.saturating_sub(1);
    }

    /// Take every pending segment and reset the buffered byte count, for discarding the lot
    pub fn take_all_segments(&self) -> Vec<Segment> {
        let segments = self.queue().drain(..).collect();

        let mut status = self.status();
        status.pending_chunks = 0;
        status.buffered = 0;

        segments
    }

    /// A flush is starting.  Has no effect while finalizing, or once the upload is over.
    pub fn begin_flush(&self) {
        let mut status = self.status();
        if matches!(status.state, SessionState::Receiving | SessionState::Failed) {
            status.state = SessionState::Flushing;
        }
    }

    /// All queued data was flushed, which also clears an earlier failure
    pub fn end_flush(&self) {
        let mut status = self.status();
        if matches!(status.state, SessionState::Flushing | SessionState::Failed) {
            status.state = SessionState::Receiving;
        }
    }

    pub fn flush_failed(&self) {
        let mut status = self.status();
        if !status.state.is_terminal() {
            status.state = SessionState::Failed;
        }
    }

    pub fn set_state(&self, state: SessionState) {
        self.status().state = state;
    }
}
