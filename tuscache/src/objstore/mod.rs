//! The object storage backend that buffered upload data is flushed to.
use crate::Result;
use bytes::Bytes;
use dyn_clone::DynClone;

mod s3;

pub use s3::{S3Store, INCOMPLETE_PART_PREFIX};

/// One part of a multipart upload that object storage has accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartRecord {
    /// 1-based, strictly increasing with no gaps
    pub part_number: u32,

    pub size: u64,

    /// Integrity token assigned by the provider (the ETag, in S3 terms).  Must be passed back
    /// verbatim when completing the upload.
    pub e_tag: String,
}

/// An object storage system which supports multipart uploads, like S3.
///
/// Every method takes the object key, which for this cache is always the upload ID.  The cache
/// never issues two calls for the same key at the same time, but calls for different keys run
/// concurrently.
///
/// Besides the usual multipart operations, implementations must be able to hold one "incomplete
/// part" per key: a blob smaller than the minimum part size which the cache parks remotely until
/// enough data has arrived to prepend it to a real part.  How it's stored is up to the
/// implementation, but it must not be visible as the object itself.
///
/// Note that all implementations are trivially cloneable such that the cost of a clone is the cost
/// of increasing the ref count on an `Arc`
#[async_trait::async_trait]
pub trait ObjectStore: DynClone + std::fmt::Debug + Sync + Send + 'static {
    /// Start a multipart upload of `key`, returning the upload ID.
    async fn create_multipart_upload(&self, key: &str) -> Result<String>;

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<PartRecord>;

    /// All parts uploaded so far, in no particular order.
    ///
    /// Fails with [`crate::TusCacheError::MultipartUploadNotFound`] if the upload doesn't exist.
    async fn list_parts(&self, key: &str, upload_id: &str) -> Result<Vec<PartRecord>>;

    /// Assemble the object from `parts`, which are in part number order.
    ///
    /// Fails with [`crate::TusCacheError::MultipartUploadNotFound`] if the upload doesn't exist.
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<PartRecord>,
    ) -> Result<()>;

    /// Fails with [`crate::TusCacheError::MultipartUploadNotFound`] if the upload doesn't exist.
    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()>;

    /// Store `data` as the incomplete part of `key`, replacing any previous one.
    async fn put_incomplete_part(&self, key: &str, data: Bytes) -> Result<()>;

    async fn get_incomplete_part(&self, key: &str) -> Result<Option<Bytes>>;

    /// Succeeds if there is no incomplete part
    async fn delete_incomplete_part(&self, key: &str) -> Result<()>;

    /// Write a whole object in one operation.  Only used for small (empty) objects.
    async fn put_object(&self, key: &str, data: Bytes) -> Result<()>;

    async fn get_object(&self, key: &str) -> Result<Option<Bytes>>;

    /// Succeeds if the object doesn't exist
    async fn delete_object(&self, key: &str) -> Result<()>;

    /// True if `key` can't be used for an upload because the store uses it for something else,
    /// like holding incomplete parts.
    fn is_reserved_key(&self, _key: &str) -> bool {
        false
    }
}

dyn_clone::clone_trait_object!(ObjectStore);
