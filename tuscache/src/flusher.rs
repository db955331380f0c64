//! Moves sealed buffer segments into object storage.
//!
//! Everything here runs with the session's flusher lock held, which is what guarantees that at
//! most one flush per upload is in flight and that segments are flushed in the order they were
//! written.
use crate::buffer::Segment;
use crate::cache::CacheInner;
use crate::metadata::IncompletePart;
use crate::session::{FlusherState, UploadSession};
use crate::Result;
use bytes::{Bytes, BytesMut};
use snafu::prelude::*;
use std::sync::Arc;
use tracing::{debug, debug_span, error, info, instrument, warn, Instrument};

/// Flush every queued segment of `session`, oldest first.
///
/// Stops at the first failure.  The failed segment goes back to the head of the queue with its
/// file untouched, and the session is left in the failed state so the next write retries it.
#[instrument(skip_all, fields(id = %session.id()))]
pub(crate) async fn drain(
    inner: &CacheInner,
    session: &UploadSession,
    flusher: &mut FlusherState,
) -> Result<()> {
    while let Some(segment) = session.next_segment() {
        session.begin_flush();

        if let Err(e) = flush_segment(inner, session, flusher, &segment).await {
            error!(seq = segment.seq, size = segment.len, err = ?e, "Flush failed; buffered data kept for retry");

            session.requeue(segment);
            session.flush_failed();
            session.backpressure.notify_flush_failed();

            return Err(e);
        }

        let len = segment.len;
        let path = segment.path.clone();

        // Removing the segment also frees its backpressure slot
        if let Err(e) = segment.remove().await {
            // The data is already in object storage so this is only a leak of disk space, which
            // the sweeper or the next restart takes care of
            warn!(path = %path.display(), err = ?e, "Failed to delete flushed buffer segment");
        }
        session.confirm(len);
    }

    session.end_flush();

    Ok(())
}

/// Start draining `session` in the background
pub(crate) fn spawn_flush(inner: Arc<CacheInner>, session: Arc<UploadSession>) {
    let span = debug_span!("background_flush", id = %session.id());

    tokio::spawn(
        async move {
            let mut flusher = session.flusher.lock().await;

            // Failures were logged by `drain` and are reported to the next write
            if drain(&inner, &session, &mut flusher).await.is_ok() {
                debug!(offset = session.offset(), "Background flush finished");
            }
        }
        .instrument(span),
    );
}

async fn flush_segment(
    inner: &CacheInner,
    session: &UploadSession,
    flusher: &mut FlusherState,
    segment: &Segment,
) -> Result<()> {
    let id = session.id();

    if segment.len == 0 {
        return Ok(());
    }

    let data = segment.read().await?;
    let parked = flusher.incomplete_part_size();

    // Undersized data parked by an earlier flush has to go in front of this segment
    let payload = if parked > 0 {
        let incomplete = fetch_incomplete_part(inner, id, flusher).await?;

        let mut payload = BytesMut::with_capacity(incomplete.len() + data.len());
        payload.extend_from_slice(&incomplete);
        payload.extend_from_slice(&data);
        payload.freeze()
    } else {
        data
    };

    let size = payload.len() as u64;
    let stored_after = session.confirmed() - parked + size;
    let is_final = session
        .declared_size()
        .map_or(false, |declared| stored_after >= declared);

    if size >= inner.config.min_part_size_bytes() || is_final {
        upload_part(inner, id, flusher, payload).await
    } else {
        park(inner, id, flusher, payload).await
    }
}

/// Upload the parked incomplete part on its own, as the last part of the upload.
///
/// For completing an upload whose final bytes were all parked by an earlier flush, so there is no
/// segment left to prepend them to.
pub(crate) async fn promote_incomplete_part(
    inner: &CacheInner,
    session: &UploadSession,
    flusher: &mut FlusherState,
) -> Result<()> {
    if flusher.incomplete_part_size() == 0 {
        return Ok(());
    }

    let id = session.id();
    let payload = fetch_incomplete_part(inner, id, flusher).await?;
    info!(size = payload.len(), "Uploading incomplete part as the final part");

    upload_part(inner, id, flusher, payload).await
}

/// The bytes of the incomplete part which the metadata records as belonging to the upload
async fn fetch_incomplete_part(
    inner: &CacheInner,
    id: &str,
    flusher: &FlusherState,
) -> Result<Bytes> {
    let size = flusher.incomplete_part_size();

    // Anything past `size` was stored by a flush that failed before recording it, and is still
    // buffered locally
    let mut data = inner
        .store
        .get_incomplete_part(id)
        .await?
        .filter(|data| data.len() as u64 >= size)
        .context(crate::error::IncompletePartMissingSnafu { id, size })?;
    data.truncate(size as usize);

    Ok(data)
}

/// Upload `payload` as the next numbered part.  It includes the incomplete part, if there is one.
async fn upload_part(
    inner: &CacheInner,
    id: &str,
    flusher: &mut FlusherState,
    payload: Bytes,
) -> Result<()> {
    let upload_id = ensure_multipart_upload(inner, flusher, id).await?;
    let part_number = flusher.last_part_number + 1;
    let size = payload.len();

    inner
        .store
        .upload_part(id, &upload_id, part_number, payload)
        .await?;
    flusher.last_part_number = part_number;

    debug!(part_number, size, "Uploaded part");

    if flusher.metadata.incomplete_part.take().is_some() {
        // The saved record names `part_number` as the part the parked bytes go into, so it reads
        // correctly after a restart even if these cleanups fail
        flusher.metadata_dirty = true;
        if let Err(e) = save_metadata(inner, flusher).await {
            warn!(err = ?e, "Failed to record that the incomplete part was uploaded");
        }
        if let Err(e) = inner.store.delete_incomplete_part(id).await {
            warn!(err = ?e, "Failed to delete incomplete part after it was uploaded as a numbered part");
        }
    }

    Ok(())
}

/// Store `payload` as the incomplete part until there's enough data for a numbered part.
///
/// The parked bytes only count once the metadata records them.
async fn park(
    inner: &CacheInner,
    id: &str,
    flusher: &mut FlusherState,
    payload: Bytes,
) -> Result<()> {
    let size = payload.len() as u64;

    inner.store.put_incomplete_part(id, payload).await?;

    let previous = flusher.metadata.incomplete_part.replace(IncompletePart {
        size,
        next_part_number: flusher.last_part_number + 1,
    });
    flusher.metadata_dirty = true;

    if let Err(e) = save_metadata(inner, flusher).await {
        // The stored object starts with the previously recorded bytes, so that record still holds
        flusher.metadata.incomplete_part = previous;
        return Err(e);
    }

    debug!(size, "Stored undersized data as the incomplete part");

    Ok(())
}

/// The ID of the session's multipart upload, starting one if this is the first part.
///
/// The ID is persisted before any part is uploaded under it, so the parts can always be found
/// again after a restart.
async fn ensure_multipart_upload(
    inner: &CacheInner,
    flusher: &mut FlusherState,
    id: &str,
) -> Result<String> {
    let upload_id = match &flusher.metadata.multipart_upload_id {
        Some(upload_id) => upload_id.clone(),
        None => {
            let upload_id = inner.store.create_multipart_upload(id).await?;
            info!(%upload_id, "Started multipart upload");

            flusher.metadata.multipart_upload_id = Some(upload_id.clone());
            flusher.metadata_dirty = true;
            upload_id
        }
    };

    save_metadata(inner, flusher).await?;

    Ok(upload_id)
}

async fn save_metadata(inner: &CacheInner, flusher: &mut FlusherState) -> Result<()> {
    if flusher.metadata_dirty {
        inner.metadata.save(&flusher.metadata).await?;
        flusher.metadata_dirty = false;
    }

    Ok(())
}

/// Take the last `written` bytes back out of the newest queued segment.
///
/// Used when the write that appended them was meant to complete the upload and couldn't, so the
/// client sees the offset from before that write and can simply resend it.
pub(crate) async fn unwind_final_write(session: &UploadSession, written: u64) -> Result<()> {
    if written == 0 {
        return Ok(());
    }

    let Some(mut segment) = session.take_last_segment() else {
        return Ok(());
    };

    let keep = segment.len.saturating_sub(written);
    let removed = segment.len - keep;

    if keep == 0 {
        let result = segment.remove().await;
        session.forget_segment();
        session.unaccept(removed);
        result
    } else {
        let result = segment.truncate(keep).await;
        if result.is_ok() {
            session.unaccept(removed);
        }
        session.restore_last_segment(segment);
        result
    }
}
