//! Cleanup of local and remote state that nobody is going to use.
//!
//! There are two parts to this.  On startup, [`recover`] throws away every buffer file left by
//! the previous process; the sessions that owned them were lost with that process, so the files
//! can't be matched to an offset any more, and clients will resend whatever wasn't flushed.
//! After that, a [`Sweeper`] periodically aborts uploads which have been idle longer than the
//! configured TTL.
use crate::buffer::{BufferFile, DiskBuffer};
use crate::cache::CacheInner;
use crate::session::UploadSession;
use crate::{Result, TusCacheError};
use snafu::prelude::*;
use std::future::Future;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

/// Delete every buffer file in `buffer`, returning how many there were.
///
/// Only local files are touched.  Parts already in object storage stay there, and the upload
/// resumes from them on its next request.
#[instrument(skip_all, fields(dir = %buffer.dir().display()))]
pub(crate) async fn recover(buffer: &DiskBuffer) -> Result<usize> {
    let files = buffer.list().await?;

    for file in &files {
        buffer.remove(file).await?;
    }

    if !files.is_empty() {
        info!(
            count = files.len(),
            "Discarded buffer files left behind by a previous run"
        );
    }

    Ok(files.len())
}

/// What a single sweep did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Idle uploads that were aborted
    pub evicted: usize,

    /// Idle uploads that were busy and will be looked at again next time
    pub deferred: usize,

    /// Buffer files that belonged to no upload in progress
    pub stray_files_removed: usize,

    pub errors: usize,
}

impl SweepReport {
    fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Aborts uploads that have been idle for longer than [`crate::Config::session_ttl`].
///
/// Get one from [`crate::UploadCache::sweeper`].
#[derive(Clone, Debug)]
pub struct Sweeper {
    inner: Arc<CacheInner>,
}

impl Sweeper {
    pub(crate) fn new(inner: Arc<CacheInner>) -> Self {
        Self { inner }
    }

    /// Sweep every [`crate::Config::sweep_interval`] until `abort` completes.
    ///
    /// A sweep that has started is always allowed to finish, so aborting never leaves an upload
    /// half evicted.
    pub async fn run(&self, abort: impl Future<Output = ()>) {
        let mut interval = tokio::time::interval(self.inner.config.sweep_period());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(abort);

        info!(
            interval = ?self.inner.config.sweep_period(),
            ttl = ?self.inner.config.session_ttl,
            "Sweeper started"
        );

        loop {
            tokio::select! {
                _ = &mut abort => break,
                _ = interval.tick() => {}
            }

            let report = self.sweep_once().await;
            if report.is_empty() {
                debug!("Sweep found nothing to do");
            } else {
                info!(?report, "Sweep finished");
            }
        }

        info!("Sweeper stopped");
    }

    /// Evict idle uploads and remove stray buffer files, once
    #[instrument(skip(self))]
    pub async fn sweep_once(&self) -> SweepReport {
        let ttl = self.inner.config.session_ttl;
        let mut report = SweepReport::default();

        for session in self.inner.registry.snapshot() {
            if session.idle_for() < ttl {
                continue;
            }

            match self.evict(&session).await {
                Ok(true) => report.evicted += 1,
                Ok(false) => {}
                Err(TusCacheError::EvictionRace { .. }) => {
                    debug!(id = session.id(), "Idle upload is busy; trying again next sweep");
                    report.deferred += 1;
                }
                Err(e) => {
                    error!(id = session.id(), err = ?e, "Failed to evict idle upload");
                    report.errors += 1;
                }
            }
        }

        let files = match self.inner.buffer.list().await {
            Ok(files) => files,
            Err(e) => {
                error!(err = ?e, "Failed to list buffer files");
                report.errors += 1;
                return report;
            }
        };

        let now = SystemTime::now();
        for file in files {
            if let Some(id) = &file.id {
                if self.inner.registry.contains(id) {
                    continue;
                }
            }

            if now.duration_since(file.modified).unwrap_or_default() < ttl {
                continue;
            }

            match self.remove_stray(&file).await {
                Ok(()) => report.stray_files_removed += 1,
                Err(e) => {
                    warn!(path = %file.path.display(), err = ?e, "Failed to remove stray buffer file");
                    report.errors += 1;
                }
            }
        }

        report
    }

    /// Abort `session` if it's still idle.
    ///
    /// Never waits for the session's locks.  If anything holds them the session is in use, and
    /// this fails with [`TusCacheError::EvictionRace`].
    async fn evict(&self, session: &Arc<UploadSession>) -> Result<bool> {
        let id = session.id();

        let mut writer = session
            .writer
            .try_lock()
            .ok()
            .context(crate::error::EvictionRaceSnafu { id })?;
        let mut flusher = session
            .flusher
            .try_lock()
            .ok()
            .context(crate::error::EvictionRaceSnafu { id })?;

        // Check again now that nothing else can touch it
        if session.state().is_terminal() || session.idle_for() < self.inner.config.session_ttl {
            return Ok(false);
        }

        info!(
            id,
            idle_secs = session.idle_for().as_secs(),
            offset = session.offset(),
            "Evicting idle upload"
        );

        self.inner
            .abort_session(session, &mut writer, &mut flusher)
            .await?;

        Ok(true)
    }

    /// Remove a buffer file no session owns, abandoning the upload it was written for
    async fn remove_stray(&self, file: &BufferFile) -> Result<()> {
        if let Some(id) = &file.id {
            if let Some(metadata) = self.inner.metadata.load(id).await? {
                if !metadata.completed {
                    info!(id, "Abandoning upload with stray buffer file");
                    self.inner.discard_stored(&metadata).await?;
                }
            }
        }

        self.inner.buffer.remove(file).await
    }
}
