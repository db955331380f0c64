//! A cache wired up to in-memory object storage and temp directories
use crate::{MemoryStore, Result};
use std::path::Path;
use tempfile::TempDir;
use tuscache::{Config, FileMetadataStore, UploadCache};

/// Config for a test cache whose directories are under `root`.
///
/// Parts are tiny so tests don't have to push megabytes around.
pub fn test_config(root: &Path) -> Config {
    Config {
        buffer_dir: root.join("buffers"),
        metadata_dir: root.join("metadata"),
        min_part_size: byte_unit::Byte::from_bytes(1024),
        max_pending_chunks: 2,
        ..Default::default()
    }
}

/// An [`UploadCache`] using a [`MemoryStore`], with its local state in a temp dir which lives as
/// long as this does
pub struct TestCache {
    pub cache: UploadCache,
    pub store: MemoryStore,
    pub config: Config,
    temp_dir: TempDir,
}

impl TestCache {
    pub async fn new() -> Result<Self> {
        Self::with_config(|_| {}).await
    }

    /// Create a cache with the test config, modified by `configure`
    pub async fn with_config(configure: impl FnOnce(&mut Config)) -> Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let mut config = test_config(temp_dir.path());
        configure(&mut config);

        let store = MemoryStore::new();
        let cache = Self::make_cache(&config, &store).await?;

        Ok(Self {
            cache,
            store,
            config,
            temp_dir,
        })
    }

    /// Simulate a process restart: a new cache over the same directories and object storage.
    ///
    /// The previous cache should be dropped before it's used again.
    pub async fn restart(&mut self) -> Result<()> {
        self.cache = Self::make_cache(&self.config, &self.store).await?;

        Ok(())
    }

    pub fn buffer_dir(&self) -> &Path {
        &self.config.buffer_dir
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Number of files in the buffer directory
    pub fn buffer_files(&self) -> Result<usize> {
        Ok(std::fs::read_dir(&self.config.buffer_dir)?.count())
    }

    async fn make_cache(config: &Config, store: &MemoryStore) -> Result<UploadCache> {
        let metadata = FileMetadataStore::new(config.metadata_dir.clone()).await?;

        Ok(UploadCache::new(config.clone(), Box::new(store.clone()), Box::new(metadata)).await?)
    }
}
