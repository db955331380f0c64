use crate::cache::CacheInner;
use crate::session::{FlusherState, SessionState, UploadSession};
use crate::Result;
use bytes::Bytes;
use snafu::prelude::*;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Complete the upload of `session` once every byte has been flushed.
///
/// Assembles the object from the uploaded parts, records the completion in the metadata store,
/// and retires the session.  Fails with [`crate::TusCacheError::AlreadyCompleted`] if that has
/// already happened.  Any other failure can be retried; a multipart upload completed by an
/// earlier attempt isn't completed a second time.
#[instrument(skip_all, fields(id = %session.id()))]
pub(crate) async fn finalize(
    inner: &CacheInner,
    session: &Arc<UploadSession>,
    flusher: &mut FlusherState,
) -> Result<u64> {
    let id = session.id();

    if flusher.metadata.completed {
        return crate::error::AlreadyCompletedSnafu {
            id,
            size: flusher.metadata.size.unwrap_or_default(),
        }
        .fail();
    }

    let size = session.confirmed();

    if !flusher.object_completed {
        // Bytes parked by an explicit flush have no segment to ride along with
        crate::flusher::promote_incomplete_part(inner, session, flusher).await?;

        match flusher.metadata.multipart_upload_id.clone() {
            Some(upload_id) => {
                let mut parts = inner.store.list_parts(id, &upload_id).await?;
                parts.sort_unstable_by_key(|part| part.part_number);

                if parts.len() as u32 != flusher.last_part_number {
                    warn!(
                        listed = parts.len(),
                        expected = flusher.last_part_number,
                        "Object storage lists a different number of parts than were uploaded"
                    );
                }

                inner
                    .store
                    .complete_multipart_upload(id, &upload_id, parts)
                    .await?;
            }
            None => {
                // Nothing was ever flushed, which only happens to an upload with no data
                ensure!(size == 0, crate::error::NoMultipartUploadSnafu { id, size });
                inner.store.put_object(id, Bytes::new()).await?;
            }
        }

        flusher.object_completed = true;

        // Normally gone already, unless deleting it after it was uploaded failed
        if let Err(e) = inner.store.delete_incomplete_part(id).await {
            warn!(err = ?e, "Failed to delete leftover incomplete part");
        }
    }

    let mut metadata = flusher.metadata.clone();
    metadata.mark_completed(size);
    inner.metadata.save(&metadata).await?;
    flusher.metadata = metadata;

    session.set_state(SessionState::Completed);
    session.backpressure.close();
    inner.registry.remove(session);

    info!(size, parts = flusher.last_part_number, "Upload completed");

    Ok(size)
}
