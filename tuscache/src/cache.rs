//! The upload cache, as used by a resumable upload protocol handler.
//!
//! Uploads arrive as a series of writes, each continuing where the last one stopped.  Written
//! bytes go to a local disk buffer first.  Whenever at least a part's worth has accumulated, it's
//! sealed and flushed to the object store as the next part of a multipart upload, in the
//! background, while more writes come in.  When the last declared byte arrives the write that
//! carried it waits until everything has been flushed and the multipart upload is completed.
//!
//! The offset reported to clients always counts both flushed and buffered bytes, and only ever
//! grows.  There are a few exceptions to "only grows": a terminating write that fails is taken
//! back out of the buffer so that it can be resent unchanged, and after a restart buffered bytes
//! are gone and the offset falls back to what the object store has.
use crate::backpressure::Admission;
use crate::buffer::DiskBuffer;
use crate::metadata::{MetadataStore, UploadMetadata};
use crate::objstore::ObjectStore;
use crate::registry::Registry;
use crate::session::{FlusherState, SessionState, UploadSession, WriterState};
use crate::sweeper::{self, Sweeper};
use crate::{flusher, Config, Result, TusCacheError};
use bytes::Bytes;
use snafu::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn, Instrument};

/// What the cache knows about an upload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadInfo {
    pub id: String,

    /// Bytes accepted so far.  This is where the client resumes from.
    pub offset: u64,

    /// Total size of the upload, if it's been declared
    pub size: Option<u64>,

    pub completed: bool,
}

impl UploadInfo {
    fn completed(id: &str, size: u64) -> Self {
        Self {
            id: id.to_string(),
            offset: size,
            size: Some(size),
            completed: true,
        }
    }

    fn of_session(session: &UploadSession) -> Self {
        if session.state() == SessionState::Completed {
            return Self::completed(session.id(), session.confirmed());
        }

        Self {
            id: session.id().to_string(),
            offset: session.offset(),
            size: session.declared_size(),
            completed: false,
        }
    }
}

/// Buffers resumable uploads on local disk and flushes them to an [`ObjectStore`] as multipart
/// uploads.
///
/// Cheap to clone; clones share the same state.  Different uploads never wait for one another,
/// and operations on the same upload are applied in the order they arrive.
///
/// Only one `UploadCache` may use a given buffer directory, since creating one deletes whatever is
/// in it.
#[derive(Clone, Debug)]
pub struct UploadCache {
    inner: Arc<CacheInner>,
}

#[derive(Debug)]
pub(crate) struct CacheInner {
    pub config: Config,
    pub store: Box<dyn ObjectStore>,
    pub metadata: Box<dyn MetadataStore>,
    pub buffer: DiskBuffer,
    pub registry: Registry,
}

/// Where an upload's state was found
enum Lookup {
    Active(Arc<UploadSession>),
    Completed(UploadMetadata),
}

impl UploadCache {
    /// Create the cache and run startup recovery on its buffer directory.
    ///
    /// This must finish before any upload traffic is accepted.
    #[instrument(skip_all, fields(buffer_dir = %config.buffer_dir.display()))]
    pub async fn new(
        config: Config,
        store: Box<dyn ObjectStore>,
        metadata: Box<dyn MetadataStore>,
    ) -> Result<Self> {
        let buffer = DiskBuffer::open(&config.buffer_dir).await?;
        sweeper::recover(&buffer).await?;

        Ok(Self {
            inner: Arc::new(CacheInner {
                config,
                store,
                metadata,
                buffer,
                registry: Registry::default(),
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The sweeper which evicts idle uploads from this cache
    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(self.inner.clone())
    }

    /// Register a new upload.
    ///
    /// `declared_size` can be left unknown and supplied later with [`Self::declare_length`].  An
    /// upload declared to be empty is completed immediately.
    #[instrument(skip(self, metadata))]
    pub async fn create(
        &self,
        id: &str,
        declared_size: Option<u64>,
        metadata: BTreeMap<String, String>,
    ) -> Result<UploadInfo> {
        ensure!(
            !self.inner.store.is_reserved_key(id),
            crate::error::ReservedUploadIdSnafu { id }
        );
        ensure!(
            !self.inner.registry.contains(id),
            crate::error::UploadExistsSnafu { id }
        );
        ensure!(
            self.inner.metadata.load(id).await?.is_none(),
            crate::error::UploadExistsSnafu { id }
        );

        let mut record = UploadMetadata::new(id, declared_size, metadata);

        if declared_size == Some(0) {
            // There will never be a part to upload, so don't start a multipart upload at all
            self.inner.store.put_object(id, Bytes::new()).await?;
            record.mark_completed(0);
            self.inner.metadata.save(&record).await?;

            info!("Created empty upload, which is complete already");

            return Ok(UploadInfo::completed(id, 0));
        }

        self.inner.metadata.save(&record).await?;

        let session = Arc::new(UploadSession::new(
            record,
            self.inner.config.pending_chunk_cap(),
        ));
        let registered = self.inner.registry.get_or_insert(session.clone());
        ensure!(
            Arc::ptr_eq(&session, &registered),
            crate::error::UploadExistsSnafu { id }
        );

        debug!("Created upload");

        Ok(UploadInfo::of_session(&session))
    }

    /// Append `body` to the upload, returning the new offset.
    ///
    /// `offset` must be the upload's current offset.  Reading stops at the declared size, if
    /// there is one; the write which reaches it completes the upload before returning.  A write to
    /// an upload which has already been completed succeeds without doing anything, so a client
    /// can resend a terminating write whose response it never saw.
    ///
    /// A body larger than [`Config::max_part_size`] is buffered as several chunks, each flushed
    /// as soon as it's full.  Waits while the upload has as many chunks waiting to be flushed as
    /// it's allowed.  If the last flush failed it's retried first, and if the retry fails too this
    /// fails with [`TusCacheError::UpstreamFailure`] without accepting anything more.
    ///
    /// Dropping the returned future before it completes is safe; bytes that were read but not
    /// yet acknowledged are discarded by the next write.
    #[instrument(skip(self, body))]
    pub async fn write<R>(&self, id: &str, offset: u64, body: R) -> Result<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        let session = match self.inner.lookup(id).await? {
            Lookup::Completed(metadata) => {
                let size = metadata.size.unwrap_or_default();
                debug!(size, "Write to completed upload ignored");
                return Ok(size);
            }
            Lookup::Active(session) => session,
        };

        let mut writer = session.writer.lock().await;
        if let Some(size) = self.check_writable(&session).await? {
            return Ok(size);
        }
        session.touch();

        let expected = session.offset();
        ensure!(
            offset == expected,
            crate::error::OffsetMismatchSnafu {
                id,
                expected,
                actual: offset
            }
        );

        let min_part_size = self.inner.config.min_part_size_bytes();
        let max_part_size = self.inner.config.max_part_size_bytes();

        // Buffered so the end of the body can be detected without waiting for another slot
        let mut body = BufReader::new(body);
        let mut new_offset = offset;
        let mut read_error = None;

        loop {
            let Some(permit) = self.admit(&session).await? else {
                return Ok(session.confirmed());
            };

            let declared = session.declared_size();
            let remaining = declared.map_or(u64::MAX, |size| size.saturating_sub(new_offset));

            let (appended, limit) = {
                let active = writer
                    .active_segment(&self.inner.buffer, id)
                    .await
                    .context(crate::error::UpstreamFailureSnafu { id })?;
                let limit = remaining.min(max_part_size.saturating_sub(active.len()));
                let appended = active
                    .append(&mut body, limit)
                    .await
                    .context(crate::error::UpstreamFailureSnafu { id })?;
                (appended, limit)
            };
            session.accept(appended.written);
            session.touch();

            new_offset += appended.written;
            let is_final = declared.map_or(false, |size| new_offset >= size);
            let active_len = writer.active.as_ref().map_or(0, |active| active.len());

            if is_final || active_len >= min_part_size {
                if let Some(active) = writer.active.take() {
                    session.enqueue(active.seal(Some(permit)));
                }

                if is_final {
                    session.set_state(SessionState::Finalizing);
                    // Chunks of this write sealed earlier may be flushed already; only the last
                    // one can be taken back if completing fails
                    let size = self.complete_upload(&session, appended.written).await?;
                    return Ok(size);
                }

                flusher::spawn_flush(self.inner.clone(), session.clone());
            } else {
                // The chunk isn't sealed yet, so it doesn't occupy a slot
                drop(permit);
            }

            if appended.read_error.is_some() {
                read_error = appended.read_error;
                break;
            }
            if appended.written < limit {
                // End of the body
                break;
            }

            // The chunk filled up; carry on into a new one if there's more to read
            match body.fill_buf().await {
                Ok(rest) if rest.is_empty() => break,
                Ok(_) => debug!(offset = new_offset, "Continuing large write in a new chunk"),
                Err(e) => {
                    read_error = Some(e);
                    break;
                }
            }
        }
        drop(writer);

        match read_error {
            Some(source) => Err(source).context(crate::error::ReadUploadBodySnafu {
                id,
                written: new_offset - offset,
            }),
            None => Ok(new_offset),
        }
    }

    /// The upload's current state, including bytes not yet flushed.
    ///
    /// An upload this process hasn't seen since it started is rebuilt from the metadata store and
    /// the parts already in object storage.
    #[instrument(skip(self))]
    pub async fn get_offset(&self, id: &str) -> Result<UploadInfo> {
        Ok(match self.inner.lookup(id).await? {
            Lookup::Completed(metadata) => {
                UploadInfo::completed(id, metadata.size.unwrap_or_default())
            }
            Lookup::Active(session) => UploadInfo::of_session(&session),
        })
    }

    /// Set the total size of an upload created without one.
    ///
    /// The size can't be less than what has been written already, and can't be changed once set.
    /// If everything has already been written, the upload is completed before this returns.
    #[instrument(skip(self))]
    pub async fn declare_length(&self, id: &str, size: u64) -> Result<UploadInfo> {
        let session = match self.inner.lookup(id).await? {
            Lookup::Completed(metadata) => {
                let declared = metadata.size.unwrap_or_default();
                ensure!(
                    declared == size,
                    crate::error::SizeAlreadyDeclaredSnafu {
                        id,
                        declared,
                        requested: size
                    }
                );
                return Ok(UploadInfo::completed(id, declared));
            }
            Lookup::Active(session) => session,
        };

        let mut writer = session.writer.lock().await;
        self.check_writable(&session).await?;

        if let Some(declared) = session.declared_size() {
            ensure!(
                declared == size,
                crate::error::SizeAlreadyDeclaredSnafu {
                    id,
                    declared,
                    requested: size
                }
            );
            return Ok(UploadInfo::of_session(&session));
        }

        let offset = session.offset();
        ensure!(
            size >= offset,
            crate::error::ExceedsDeclaredSizeSnafu {
                id,
                declared: size,
                offset
            }
        );

        {
            let mut flusher = session.flusher.lock().await;
            flusher.metadata.size = Some(size);
            flusher.metadata_dirty = true;
            self.inner.metadata.save(&flusher.metadata).await?;
            flusher.metadata_dirty = false;
        }
        session.set_declared_size(size);
        session.touch();

        info!(offset, "Declared upload size");

        if size == offset {
            // Everything has arrived already
            let Some(permit) = self.admit(&session).await? else {
                return Ok(UploadInfo::of_session(&session));
            };
            match writer.active.take() {
                Some(active) => session.enqueue(active.seal(Some(permit))),
                None => drop(permit),
            }
            session.set_state(SessionState::Finalizing);
            drop(writer);

            self.complete_upload(&session, 0).await?;
        }

        Ok(UploadInfo::of_session(&session))
    }

    /// Flush whatever is buffered for the upload now, however little it is.
    ///
    /// Data smaller than a part is stored as the upload's incomplete part.  This is also how to
    /// retry a failed flush without writing anything.
    #[instrument(skip(self))]
    pub async fn flush(&self, id: &str) -> Result<UploadInfo> {
        let session = match self.inner.lookup(id).await? {
            Lookup::Completed(metadata) => {
                return Ok(UploadInfo::completed(
                    id,
                    metadata.size.unwrap_or_default(),
                ))
            }
            Lookup::Active(session) => session,
        };

        let mut writer = session.writer.lock().await;
        if let Some(size) = self.check_writable(&session).await? {
            return Ok(UploadInfo::completed(id, size));
        }

        if writer.active.as_ref().map_or(false, |active| active.len() > 0) {
            let Some(permit) = self.admit(&session).await? else {
                return Ok(UploadInfo::of_session(&session));
            };
            if let Some(active) = writer.active.take() {
                session.enqueue(active.seal(Some(permit)));
            }
        }
        drop(writer);

        let inner = self.inner.clone();
        let detached = session.clone();
        join(tokio::spawn(
            async move {
                let mut flusher = detached.flusher.lock().await;
                flusher::drain(&inner, &detached, &mut flusher)
                    .await
                    .context(crate::error::UpstreamFailureSnafu { id: detached.id() })
            }
            .in_current_span(),
        ))
        .await?;

        Ok(UploadInfo::of_session(&session))
    }

    /// Delete the upload.
    ///
    /// An upload in progress has its multipart upload aborted and its buffered data discarded.
    /// For a completed upload, the object itself is deleted.  Either way the metadata is deleted
    /// and the ID becomes unknown.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: &str) -> Result<()> {
        if let Some(session) = self.inner.registry.get(id) {
            // Wake any writer waiting for a slot so it lets go of the writer lock
            session.backpressure.close();

            let inner = self.inner.clone();
            let removed = join(tokio::spawn(
                async move {
                    let mut writer = session.writer.lock().await;
                    let mut flusher = session.flusher.lock().await;

                    let removed = match session.state() {
                        // Finished while we waited for the locks
                        SessionState::Completed => Ok(false),
                        SessionState::Aborted => Ok(true),
                        _ => inner
                            .abort_session(&session, &mut writer, &mut flusher)
                            .await
                            .map(|()| true),
                    };
                    removed
                }
                .in_current_span(),
            ))
            .await?;

            if removed {
                return Ok(());
            }
        }

        let metadata = self
            .inner
            .metadata
            .load(id)
            .await?
            .context(crate::error::UnknownUploadSnafu { id })?;

        if metadata.completed {
            self.inner.store.delete_object(id).await?;
            self.inner.metadata.delete(id).await?;
            info!("Deleted completed upload");
        } else {
            self.inner.discard_stored(&metadata).await?;
        }

        Ok(())
    }

    /// State of the upload, if it's in progress in this process
    pub fn session_state(&self, id: &str) -> Option<SessionState> {
        self.inner.registry.get(id).map(|session| session.state())
    }

    /// Number of sealed chunks of the upload that haven't been flushed yet, if it's in progress in
    /// this process
    pub fn pending_chunks(&self, id: &str) -> Option<usize> {
        self.inner
            .registry
            .get(id)
            .map(|session| session.pending_chunks())
    }

    /// Check that `session`, whose writer lock the caller holds, can take a write.
    ///
    /// Retries a failed flush.  `Some(size)` if the upload has been completed.
    async fn check_writable(&self, session: &Arc<UploadSession>) -> Result<Option<u64>> {
        if session.state() == SessionState::Finalizing {
            // A terminating write whose caller went away is still being completed
            drop(session.flusher.lock().await);
        }

        match session.state() {
            SessionState::Completed => Ok(Some(session.confirmed())),
            SessionState::Aborted => crate::error::UnknownUploadSnafu { id: session.id() }.fail(),
            SessionState::Failed => self.retry_failed_flush(session).await,
            _ => Ok(None),
        }
    }

    /// Wait for a chunk slot for `session`.  `None` if the upload was completed meanwhile.
    async fn admit(&self, session: &Arc<UploadSession>) -> Result<Option<OwnedSemaphorePermit>> {
        loop {
            match session
                .backpressure
                .admit(|| session.state() == SessionState::Failed)
                .await
            {
                Admission::Granted(permit) => return Ok(Some(permit)),
                Admission::FlushFailed => {
                    if self.retry_failed_flush(session).await?.is_some() {
                        return Ok(None);
                    }
                }
                Admission::Closed if session.state() == SessionState::Completed => {
                    return Ok(None)
                }
                Admission::Closed => {
                    return crate::error::UnknownUploadSnafu { id: session.id() }.fail()
                }
            }
        }
    }

    async fn retry_failed_flush(&self, session: &Arc<UploadSession>) -> Result<Option<u64>> {
        let inner = self.inner.clone();
        let session = session.clone();

        join(tokio::spawn(
            async move { inner.retry_failed_flush(&session).await }.in_current_span(),
        ))
        .await
    }

    async fn complete_upload(&self, session: &Arc<UploadSession>, written: u64) -> Result<u64> {
        let inner = self.inner.clone();
        let session = session.clone();

        join(tokio::spawn(
            async move { inner.complete_upload(&session, written).await }.in_current_span(),
        ))
        .await
    }
}

impl WriterState {
    /// The segment receiving writes, starting a new one if there isn't one
    async fn active_segment(
        &mut self,
        buffer: &DiskBuffer,
        id: &str,
    ) -> Result<&mut crate::buffer::SegmentWriter> {
        match self.active {
            Some(ref mut active) => Ok(active),
            None => {
                let segment = buffer.create_segment(id, self.next_seq).await?;
                self.next_seq += 1;
                Ok(self.active.insert(segment))
            }
        }
    }
}

impl CacheInner {
    async fn lookup(&self, id: &str) -> Result<Lookup> {
        if let Some(session) = self.registry.get(id) {
            return Ok(Lookup::Active(session));
        }

        let metadata = self
            .metadata
            .load(id)
            .await?
            .context(crate::error::UnknownUploadSnafu { id })?;

        if metadata.completed {
            return Ok(Lookup::Completed(metadata));
        }

        self.rehydrate(metadata).await.map(Lookup::Active)
    }

    /// Rebuild the session of an upload that was in progress when this process started, from
    /// what the object store holds
    #[instrument(skip_all, fields(id = %metadata.id))]
    async fn rehydrate(&self, mut metadata: UploadMetadata) -> Result<Arc<UploadSession>> {
        let id = metadata.id.clone();

        let parts = match &metadata.multipart_upload_id {
            Some(upload_id) => match self.store.list_parts(&id, upload_id).await {
                Ok(parts) => parts,
                Err(e) if e.is_not_found() => {
                    warn!(%upload_id, "Multipart upload no longer exists, so the upload can't be resumed");
                    return crate::error::UnknownUploadSnafu { id }.fail();
                }
                Err(e) => return Err(e),
            },
            None => Vec::new(),
        };

        let last_part_number = parts
            .iter()
            .map(|part| part.part_number)
            .max()
            .unwrap_or_default();

        if let Some(parked) = metadata.incomplete_part {
            if last_part_number >= parked.next_part_number {
                debug!(
                    size = parked.size,
                    "Incomplete part was already uploaded in a numbered part"
                );
                metadata.incomplete_part = None;
            } else {
                let stored = self
                    .store
                    .get_incomplete_part(&id)
                    .await?
                    .map_or(0, |data| data.len() as u64);

                if stored < parked.size {
                    warn!(
                        recorded = parked.size,
                        stored,
                        "Incomplete part is missing from object storage; its bytes must be resent"
                    );
                    metadata.incomplete_part = None;
                }
            }
        }

        let incomplete_part_size = metadata.incomplete_part_size();
        let confirmed = parts.iter().map(|part| part.size).sum::<u64>() + incomplete_part_size;

        info!(
            confirmed,
            parts = parts.len(),
            incomplete_part_size,
            "Resuming upload from object storage"
        );

        let session = Arc::new(UploadSession::resume(
            metadata,
            confirmed,
            last_part_number,
            self.config.pending_chunk_cap(),
        ));

        Ok(self.registry.get_or_insert(session))
    }

    /// Flush everything queued for `session` and complete the upload.
    ///
    /// If the flush fails, the last `written` bytes are taken back out of the buffer so the
    /// terminating write can be resent as it was.
    async fn complete_upload(&self, session: &Arc<UploadSession>, written: u64) -> Result<u64> {
        let mut flusher = session.flusher.lock().await;

        if let Err(e) = flusher::drain(self, session, &mut flusher).await {
            if let Err(unwind_err) = flusher::unwind_final_write(session, written).await {
                error!(err = ?unwind_err, "Failed to take back the terminating write after a failed flush");
            }
            session.flush_failed();

            return Err(e).context(crate::error::UpstreamFailureSnafu { id: session.id() });
        }

        self.finalize_flushed(session, &mut flusher).await
    }

    async fn finalize_flushed(
        &self,
        session: &Arc<UploadSession>,
        flusher: &mut FlusherState,
    ) -> Result<u64> {
        match crate::finalize::finalize(self, session, flusher).await {
            Ok(size) => Ok(size),
            Err(TusCacheError::AlreadyCompleted { size, .. }) => Ok(size),
            Err(e) => {
                error!(err = ?e, "Failed to complete upload; resending the terminating write will retry");
                session.flush_failed();

                Err(e).context(crate::error::UpstreamFailureSnafu { id: session.id() })
            }
        }
    }

    /// Retry whatever put `session` in the failed state.  `Some(size)` if that completed the
    /// upload.
    async fn retry_failed_flush(&self, session: &Arc<UploadSession>) -> Result<Option<u64>> {
        let mut flusher = session.flusher.lock().await;

        match session.state() {
            SessionState::Failed => {}
            SessionState::Completed => return Ok(Some(session.confirmed())),
            _ => return Ok(None),
        }

        info!(id = session.id(), "Retrying failed flush");

        flusher::drain(self, session, &mut flusher)
            .await
            .context(crate::error::UpstreamFailureSnafu { id: session.id() })?;

        if session.fully_confirmed() {
            session.set_state(SessionState::Finalizing);
            return self.finalize_flushed(session, &mut flusher).await.map(Some);
        }

        Ok(None)
    }

    /// Tear down `session`: discard its local data, abort its multipart upload, and delete its
    /// metadata.  The caller holds both of the session's locks.
    ///
    /// Every step is attempted even if an earlier one fails; the first failure is returned.
    pub(crate) async fn abort_session(
        &self,
        session: &Arc<UploadSession>,
        writer: &mut WriterState,
        flusher: &mut FlusherState,
    ) -> Result<()> {
        let id = session.id();

        session.set_state(SessionState::Aborted);
        session.backpressure.close();
        self.registry.remove(session);

        let mut first_error = None;

        if let Some(active) = writer.active.take() {
            keep_first_error(&mut first_error, active.discard().await);
        }
        for segment in session.take_all_segments() {
            keep_first_error(&mut first_error, segment.remove().await);
        }
        keep_first_error(
            &mut first_error,
            self.abort_remote(id, flusher.metadata.multipart_upload_id.as_deref())
                .await,
        );
        keep_first_error(&mut first_error, self.metadata.delete(id).await);

        info!(id, "Upload aborted");

        first_error.map_or(Ok(()), Err)
    }

    /// Abandon an upload which has no session: abort its multipart upload, and delete its buffer
    /// files and metadata
    pub(crate) async fn discard_stored(&self, metadata: &UploadMetadata) -> Result<()> {
        let id = &metadata.id;

        self.abort_remote(id, metadata.multipart_upload_id.as_deref())
            .await?;
        self.buffer.remove_all_for(id).await?;
        self.metadata.delete(id).await?;

        info!(id, "Upload discarded");

        Ok(())
    }

    /// Abort the multipart upload and delete the incomplete part, tolerating either being gone
    async fn abort_remote(&self, id: &str, upload_id: Option<&str>) -> Result<()> {
        if let Some(upload_id) = upload_id {
            match self.store.abort_multipart_upload(id, upload_id).await {
                Ok(()) => debug!(id, upload_id, "Aborted multipart upload"),
                Err(e) if e.is_not_found() => {
                    debug!(id, upload_id, "Multipart upload was already gone")
                }
                Err(e) => return Err(e),
            }
        }

        self.store.delete_incomplete_part(id).await
    }
}

fn keep_first_error(first_error: &mut Option<TusCacheError>, result: Result<()>) {
    if let Err(e) = result {
        warn!(err = ?e, "Cleanup step failed");
        first_error.get_or_insert(e);
    }
}

/// Wait for a task spawned so that its caller going away can't interrupt it
async fn join<T>(handle: JoinHandle<T>) -> T {
    match handle.await {
        Ok(result) => result,
        Err(e) => std::panic::resume_unwind(e.into_panic()),
    }
}
