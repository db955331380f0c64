//! Persistent per-upload metadata.
//!
//! The in-memory session registry is lost when the process exits.  Everything needed to rebuild
//! it, and to answer questions about uploads which have already completed, lives in an
//! [`UploadMetadata`] record kept in a [`MetadataStore`].
use crate::util::encode_id;
use crate::Result;
use chrono::{DateTime, Utc};
use dyn_clone::DynClone;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub id: String,

    /// Total size of the upload.  `None` until the client declares it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(default)]
    pub completed: bool,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Provider-side ID of the multipart upload, once the first part has been flushed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multipart_upload_id: Option<String>,

    /// Undersized data parked in object storage, if there is any.
    ///
    /// This record, not the existence of the incomplete part object, is what says how many parked
    /// bytes belong to the upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incomplete_part: Option<IncompletePart>,

    /// Opaque key/value metadata supplied by the client when the upload was created
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// The incomplete part of an upload, as last recorded
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompletePart {
    /// Leading bytes of the incomplete part object which belong to the upload.  The object can be
    /// longer if a later store of it wasn't recorded.
    pub size: u64,

    /// The part the parked bytes will be prepended to.  Once a part with this number or higher
    /// exists they've been uploaded, whether or not the incomplete part object is still around.
    pub next_part_number: u32,
}

impl UploadMetadata {
    pub fn new(
        id: impl Into<String>,
        size: Option<u64>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: id.into(),
            size,
            completed: false,
            created_at: Utc::now(),
            completed_at: None,
            multipart_upload_id: None,
            incomplete_part: None,
            metadata,
        }
    }

    pub(crate) fn mark_completed(&mut self, size: u64) {
        self.size = Some(size);
        self.completed = true;
        self.completed_at = Some(Utc::now());
        self.incomplete_part = None;
    }

    /// Bytes recorded in the incomplete part, 0 if there is none
    pub(crate) fn incomplete_part_size(&self) -> u64 {
        self.incomplete_part.map_or(0, |part| part.size)
    }
}

/// Key/value store of [`UploadMetadata`] keyed by upload ID.
#[async_trait::async_trait]
pub trait MetadataStore: DynClone + std::fmt::Debug + Sync + Send + 'static {
    async fn load(&self, id: &str) -> Result<Option<UploadMetadata>>;

    /// Insert or replace the record for `metadata.id`
    async fn save(&self, metadata: &UploadMetadata) -> Result<()>;

    /// Succeeds if there is no such record
    async fn delete(&self, id: &str) -> Result<()>;
}

dyn_clone::clone_trait_object!(MetadataStore);

/// [`MetadataStore`] which keeps each record in its own JSON file in a local directory.
#[derive(Clone, Debug)]
pub struct FileMetadataStore {
    dir: Arc<PathBuf>,
}

impl FileMetadataStore {
    /// Use `dir` for metadata records, creating it if needed
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();

        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|_| crate::error::MetadataIoSnafu { path: dir.clone() })?;

        Ok(Self { dir: Arc::new(dir) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_id(id)))
    }
}

#[async_trait::async_trait]
impl MetadataStore for FileMetadataStore {
    async fn load(&self, id: &str) -> Result<Option<UploadMetadata>> {
        let path = self.path(id);

        let json = match tokio::fs::read(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context(crate::error::MetadataIoSnafu { path }),
        };

        let metadata = serde_json::from_slice(&json)
            .context(crate::error::MetadataJsonSnafu { path })?;

        Ok(Some(metadata))
    }

    #[instrument(skip_all, fields(id = %metadata.id))]
    async fn save(&self, metadata: &UploadMetadata) -> Result<()> {
        let path = self.path(&metadata.id);
        let temp_path = path.with_extension("json.tmp");

        let json = serde_json::to_vec_pretty(metadata)
            .with_context(|_| crate::error::MetadataJsonSnafu { path: path.clone() })?;

        // Write then rename, so a crash never leaves a truncated record behind
        tokio::fs::write(&temp_path, json)
            .await
            .with_context(|_| crate::error::MetadataIoSnafu {
                path: temp_path.clone(),
            })?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .with_context(|_| crate::error::MetadataIoSnafu { path: path.clone() })?;

        debug!(path = %path.display(), "Saved upload metadata");

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.path(id);

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context(crate::error::MetadataIoSnafu { path }),
        }
    }
}
