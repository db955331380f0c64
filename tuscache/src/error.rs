use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::{
    abort_multipart_upload::AbortMultipartUploadError,
    complete_multipart_upload::CompleteMultipartUploadError,
    create_multipart_upload::CreateMultipartUploadError, delete_object::DeleteObjectError,
    get_object::GetObjectError, list_parts::ListPartsError, put_object::PutObjectError,
    upload_part::UploadPartError,
};
use snafu::prelude::*;
use std::path::PathBuf;

pub type Result<T, E = TusCacheError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TusCacheError {
    #[snafu(display(
        "Upload '{id}' received a write at offset {actual}, but its current offset is {expected}"
    ))]
    OffsetMismatch {
        id: String,
        expected: u64,
        actual: u64,
    },

    #[snafu(display("Upload '{id}' doesn't exist, and there is no completed object with that ID"))]
    UnknownUpload { id: String },

    #[snafu(display("Upload '{id}' already exists"))]
    UploadExists { id: String },

    #[snafu(display("Upload '{id}' was already completed with a final size of {size} bytes"))]
    AlreadyCompleted { id: String, size: u64 },

    #[snafu(display(
        "Flushing buffered data for upload '{id}' to object storage failed.  The buffered data has been kept and the write can be retried"
    ))]
    UpstreamFailure {
        id: String,
        #[snafu(source(from(TusCacheError, Box::new)))]
        source: Box<TusCacheError>,
    },

    #[snafu(display("Upload '{id}' is busy and can't be evicted right now"))]
    EvictionRace { id: String },

    #[snafu(display(
        "Upload '{id}' has a declared size of {declared} bytes, which is smaller than its current offset {offset}"
    ))]
    ExceedsDeclaredSize {
        id: String,
        declared: u64,
        offset: u64,
    },

    #[snafu(display(
        "Upload '{id}' already has a declared size of {declared} bytes; it can't be changed to {requested}"
    ))]
    SizeAlreadyDeclared {
        id: String,
        declared: u64,
        requested: u64,
    },

    #[snafu(display(
        "Error reading the body of a write to upload '{id}'; {written} bytes were accepted before the error"
    ))]
    ReadUploadBody {
        id: String,
        written: u64,
        source: std::io::Error,
    },

    #[snafu(display("I/O error on local buffer path '{}'", path.display()))]
    BufferIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("I/O error on upload metadata file '{}'", path.display()))]
    MetadataIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Upload metadata file '{}' is not valid", path.display()))]
    MetadataJson {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display(
        "Upload '{id}' has {size} bytes recorded in an incomplete part, but no incomplete part exists in object storage"
    ))]
    IncompletePartMissing { id: String, size: u64 },

    #[snafu(display(
        "Upload '{id}' has {size} bytes confirmed, but no multipart upload was ever started for them"
    ))]
    NoMultipartUpload { id: String, size: u64 },

    #[snafu(display("'{id}' can't be used as an upload ID with this object store"))]
    ReservedUploadId { id: String },

    #[snafu(display("Error creating multipart upload for object '{key}' in S3 bucket '{bucket}'"))]
    CreateMultipartUpload {
        bucket: String,
        key: String,
        source: SdkError<CreateMultipartUploadError>,
    },

    #[snafu(display(
        "Error uploading part {part_number} of object '{key}' to S3 bucket '{bucket}'"
    ))]
    UploadPart {
        bucket: String,
        key: String,
        part_number: u32,
        source: SdkError<UploadPartError>,
    },

    #[snafu(display("Error listing uploaded parts of object '{key}' in S3 bucket '{bucket}'"))]
    ListParts {
        bucket: String,
        key: String,
        source: SdkError<ListPartsError>,
    },

    #[snafu(display(
        "Error completing multipart upload of object '{key}' in S3 bucket '{bucket}'"
    ))]
    CompleteMultipartUpload {
        bucket: String,
        key: String,
        source: SdkError<CompleteMultipartUploadError>,
    },

    #[snafu(display("Error aborting multipart upload of object '{key}' in S3 bucket '{bucket}'"))]
    AbortMultipartUpload {
        bucket: String,
        key: String,
        source: SdkError<AbortMultipartUploadError>,
    },

    #[snafu(display("Error writing object '{key}' to S3 bucket '{bucket}'"))]
    PutObject {
        bucket: String,
        key: String,
        source: SdkError<PutObjectError>,
    },

    #[snafu(display("Error reading object '{key}' from S3 bucket '{bucket}'"))]
    GetObject {
        bucket: String,
        key: String,
        source: SdkError<GetObjectError>,
    },

    #[snafu(display("Error reading the body of object '{key}' from S3 bucket '{bucket}'"))]
    ReadByteStream {
        bucket: String,
        key: String,
        source: aws_sdk_s3::primitives::ByteStreamError,
    },

    #[snafu(display("Error deleting object '{key}' from S3 bucket '{bucket}'"))]
    DeleteObject {
        bucket: String,
        key: String,
        source: SdkError<DeleteObjectError>,
    },

    #[snafu(display("The multipart upload '{upload_id}' of object '{key}' doesn't exist"))]
    MultipartUploadNotFound { key: String, upload_id: String },

    #[snafu(display("Object storage operation on '{key}' failed"))]
    ObjectStore {
        key: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl TusCacheError {
    /// True if the error means the remote object or multipart upload is already gone.
    ///
    /// Cleanup paths treat this as success.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::MultipartUploadNotFound { .. })
    }

    /// True if resending the same write may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamFailure { .. } | Self::BufferIo { .. } | Self::ReadUploadBody { .. }
        )
    }
}
