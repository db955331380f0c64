//! The local disk buffer.
//!
//! Bytes accepted for an upload are appended to a segment file in the buffer directory.  Once a
//! segment holds enough data to be flushed it's sealed and a new segment is started for the
//! following writes, so the flusher can read a sealed segment while writes keep landing in the
//! next one.  Segment files are named `<encoded id>.<sequence>.part`.
//!
//! This module knows nothing about offsets or object storage; it only stores bytes.
use crate::util::{decode_id, encode_id};
use crate::Result;
use bytes::Bytes;
use snafu::{prelude::*, IntoError};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, warn};

const SEGMENT_EXTENSION: &str = "part";

/// Size of the buffer used to copy a request body into a segment file
const COPY_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub(crate) struct DiskBuffer {
    dir: PathBuf,
}

/// A segment file found in the buffer directory
#[derive(Debug)]
pub(crate) struct BufferFile {
    /// The upload the file belongs to, if the file name is one this module produced
    pub id: Option<String>,
    pub path: PathBuf,
    pub modified: SystemTime,
}

impl DiskBuffer {
    /// Use `dir` as the buffer directory, creating it if needed
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();

        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|_| crate::error::BufferIoSnafu { path: dir.clone() })?;

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn segment_path(&self, id: &str, seq: u64) -> PathBuf {
        self.dir
            .join(format!("{}.{seq}.{SEGMENT_EXTENSION}", encode_id(id)))
    }

    /// Start a new, empty segment for `id`
    pub async fn create_segment(&self, id: &str, seq: u64) -> Result<SegmentWriter> {
        let path = self.segment_path(id, seq);

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await
            .with_context(|_| crate::error::BufferIoSnafu { path: path.clone() })?;

        debug!(path = %path.display(), "Created buffer segment");

        Ok(SegmentWriter {
            seq,
            path,
            file,
            len: 0,
        })
    }

    /// All segment files currently in the buffer directory
    pub async fn list(&self) -> Result<Vec<BufferFile>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|_| crate::error::BufferIoSnafu {
                path: self.dir.clone(),
            })?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|_| crate::error::BufferIoSnafu {
                path: self.dir.clone(),
            })?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(SEGMENT_EXTENSION) {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                // Removed between listing and stat
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(crate::error::BufferIoSnafu { path }.into_error(e)),
            };

            let id = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.rsplit_once('.'))
                .and_then(|(encoded, _seq)| decode_id(encoded));

            files.push(BufferFile {
                id,
                modified: metadata.modified().unwrap_or_else(|_| SystemTime::now()),
                path,
            });
        }

        Ok(files)
    }

    pub async fn remove(&self, file: &BufferFile) -> Result<()> {
        remove_file(&file.path).await
    }

    /// Delete every segment file of `id`
    pub async fn remove_all_for(&self, id: &str) -> Result<usize> {
        let mut removed = 0;

        for file in self.list().await? {
            if file.id.as_deref() == Some(id) {
                remove_file(&file.path).await?;
                removed += 1;
            }
        }

        Ok(removed)
    }
}

/// The segment currently receiving writes for an upload
#[derive(Debug)]
pub(crate) struct SegmentWriter {
    seq: u64,
    path: PathBuf,
    file: tokio::fs::File,

    /// Bytes appended and accounted for.  The file can be longer than this only if an append was
    /// cancelled midway.
    len: u64,
}

/// What a call to [`SegmentWriter::append`] accepted
#[derive(Debug)]
pub(crate) struct Appended {
    pub written: u64,

    /// The body failed after `written` bytes were read from it
    pub read_error: Option<std::io::Error>,
}

impl SegmentWriter {
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Copy up to `limit` bytes from `body` to the end of the segment, flushing them to the OS
    /// before returning.
    ///
    /// If `body` fails the bytes read before the failure are kept, and the error is reported in
    /// [`Appended::read_error`].  If the file itself can't be written nothing is kept.
    pub async fn append<R>(&mut self, body: &mut R, limit: u64) -> Result<Appended>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        // Anything past `len` is left over from an append whose future was dropped midway.  Those
        // bytes were never acknowledged so they are discarded.
        self.file
            .set_len(self.len)
            .await
            .with_context(|_| crate::error::BufferIoSnafu {
                path: self.path.clone(),
            })?;
        self.file
            .seek(SeekFrom::Start(self.len))
            .await
            .with_context(|_| crate::error::BufferIoSnafu {
                path: self.path.clone(),
            })?;

        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut written = 0u64;
        let mut read_error = None;

        while written < limit {
            let max = (limit - written).min(buffer.len() as u64) as usize;

            let count = match body.read(&mut buffer[..max]).await {
                Ok(0) => break,
                Ok(count) => count,
                Err(e) => {
                    read_error = Some(e);
                    break;
                }
            };

            if let Err(e) = self.file.write_all(&buffer[..count]).await {
                return Err(self.rollback(e).await);
            }
            written += count as u64;
        }

        if let Err(e) = self.file.flush().await {
            return Err(self.rollback(e).await);
        }

        self.len += written;

        Ok(Appended {
            written,
            read_error,
        })
    }

    /// Undo a partially written append after a local I/O error, returning the error
    async fn rollback(&mut self, e: std::io::Error) -> crate::TusCacheError {
        if let Err(truncate_err) = self.file.set_len(self.len).await {
            warn!(path = %self.path.display(), err = ?truncate_err, "Failed to truncate buffer segment after write error");
        }

        crate::error::BufferIoSnafu {
            path: self.path.clone(),
        }
        .into_error(e)
    }

    /// Stop writing to this segment and hand it to the flusher.
    ///
    /// `permit` is the backpressure slot the segment occupies until it's flushed.
    pub fn seal(self, permit: Option<OwnedSemaphorePermit>) -> Segment {
        Segment {
            seq: self.seq,
            path: self.path,
            len: self.len,
            _permit: permit,
        }
    }

    /// Delete the segment without flushing it
    pub async fn discard(self) -> Result<()> {
        drop(self.file);
        remove_file(&self.path).await
    }
}

/// A sealed segment, waiting to be flushed
#[derive(Debug)]
pub(crate) struct Segment {
    pub seq: u64,
    pub path: PathBuf,
    pub len: u64,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Segment {
    pub async fn read(&self) -> Result<Bytes> {
        let data = tokio::fs::read(&self.path)
            .await
            .with_context(|_| crate::error::BufferIoSnafu {
                path: self.path.clone(),
            })?;

        // The file is never longer than `len` once sealed, but be strict about what gets flushed
        let mut data = Bytes::from(data);
        data.truncate(self.len as usize);

        Ok(data)
    }

    /// Shrink the segment to `len` bytes
    pub async fn truncate(&mut self, len: u64) -> Result<()> {
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&self.path)
            .await
            .with_context(|_| crate::error::BufferIoSnafu {
                path: self.path.clone(),
            })?;
        file.set_len(len)
            .await
            .with_context(|_| crate::error::BufferIoSnafu {
                path: self.path.clone(),
            })?;

        self.len = len;

        Ok(())
    }

    /// Delete the segment file, releasing its backpressure slot
    pub async fn remove(self) -> Result<()> {
        remove_file(&self.path).await
    }
}

async fn remove_file(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).context(crate::error::BufferIoSnafu { path }),
    }
}
