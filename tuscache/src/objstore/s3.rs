use super::{ObjectStore, PartRecord};
use crate::util::aws_sdk::IntoStream;
use crate::{Config, Result};
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_types::region::Region;
use bytes::Bytes;
use futures::TryStreamExt;
use snafu::{prelude::*, IntoError};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Key prefix of the objects holding incomplete parts
pub const INCOMPLETE_PART_PREFIX: &str = ".tuscache-incomplete/";

/// Implementation of [`ObjectStore`] for S3 and S3-compatible APIs.
///
/// Objects are stored in a single bucket, keyed by upload ID.  The incomplete part of an upload
/// is kept as a separate object under [`INCOMPLETE_PART_PREFIX`], which upload IDs may not start
/// with.
#[derive(Clone)]
pub struct S3Store {
    inner: Arc<S3StoreInner>,
}

struct S3StoreInner {
    bucket: String,
    client: aws_sdk_s3::Client,
}

impl S3Store {
    /// Connect to the bucket `bucket` using the S3 settings in `config`.
    ///
    /// This doesn't make any network calls, so a misconfigured bucket only shows up as errors on
    /// the first upload.
    pub async fn new(config: &Config, bucket: impl Into<String>) -> Self {
        Self::with_client(make_s3_client(config).await, bucket)
    }

    /// Use an already-configured S3 client
    pub fn with_client(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(S3StoreInner {
                bucket: bucket.into(),
                client,
            }),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.inner.bucket
    }

    fn incomplete_part_key(key: &str) -> String {
        format!("{INCOMPLETE_PART_PREFIX}{key}")
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let response = match self
            .inner
            .client
            .get_object()
            .bucket(&self.inner.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => {
                return Err(crate::error::GetObjectSnafu {
                    bucket: self.inner.bucket.clone(),
                    key,
                }
                .into_error(e))
            }
        };

        let data = response
            .body
            .collect()
            .await
            .with_context(|_| crate::error::ReadByteStreamSnafu {
                bucket: self.inner.bucket.clone(),
                key,
            })?;

        Ok(Some(data.into_bytes()))
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.inner
            .client
            .put_object()
            .bucket(&self.inner.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .with_context(|_| crate::error::PutObjectSnafu {
                bucket: self.inner.bucket.clone(),
                key,
            })?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        // S3 reports success when deleting a key that doesn't exist
        self.inner
            .client
            .delete_object()
            .bucket(&self.inner.bucket)
            .key(key)
            .send()
            .await
            .with_context(|_| crate::error::DeleteObjectSnafu {
                bucket: self.inner.bucket.clone(),
                key,
            })?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3Store {
    #[instrument(skip(self), fields(bucket = %self.inner.bucket))]
    async fn create_multipart_upload(&self, key: &str) -> Result<String> {
        let response = self
            .inner
            .client
            .create_multipart_upload()
            .bucket(&self.inner.bucket)
            .key(key)
            .send()
            .await
            .with_context(|_| crate::error::CreateMultipartUploadSnafu {
                bucket: self.inner.bucket.clone(),
                key,
            })?;

        let upload_id = response
            .upload_id()
            .expect("BUG: multi-part uploads always have upload ID")
            .to_string();

        debug!(%upload_id, "Started multipart upload");

        Ok(upload_id)
    }

    #[instrument(skip(self, data), fields(bucket = %self.inner.bucket, size = data.len()))]
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<PartRecord> {
        let size = data.len() as u64;

        let response = self
            .inner
            .client
            .upload_part()
            .bucket(&self.inner.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .content_length(size as i64)
            .body(ByteStream::from(data))
            .send()
            .await
            .with_context(|_| crate::error::UploadPartSnafu {
                bucket: self.inner.bucket.clone(),
                key,
                part_number,
            })?;

        Ok(PartRecord {
            part_number,
            size,
            e_tag: response
                .e_tag()
                .expect("BUG: uploaded part missing etag")
                .to_string(),
        })
    }

    #[instrument(skip(self), fields(bucket = %self.inner.bucket))]
    async fn list_parts(&self, key: &str, upload_id: &str) -> Result<Vec<PartRecord>> {
        let pages = self
            .inner
            .client
            .list_parts()
            .bucket(&self.inner.bucket)
            .key(key)
            .upload_id(upload_id)
            .into_paginator()
            .send()
            .into_stream();

        let pages: Vec<_> = pages.try_collect().await.map_err(|e| {
            if is_not_found(&e) {
                crate::error::MultipartUploadNotFoundSnafu { key, upload_id }.build()
            } else {
                crate::error::ListPartsSnafu {
                    bucket: self.inner.bucket.clone(),
                    key,
                }
                .into_error(e)
            }
        })?;

        let parts = pages
            .iter()
            .flat_map(|page| page.parts())
            .map(|part| PartRecord {
                part_number: part.part_number().unwrap_or_default() as u32,
                size: part.size().unwrap_or_default() as u64,
                e_tag: part.e_tag().unwrap_or_default().to_string(),
            })
            .collect::<Vec<_>>();

        debug!(parts = parts.len(), "Listed uploaded parts");

        Ok(parts)
    }

    #[instrument(skip(self, parts), fields(bucket = %self.inner.bucket, parts = parts.len()))]
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<PartRecord>,
    ) -> Result<()> {
        let parts = parts
            .into_iter()
            .map(|part| {
                CompletedPart::builder()
                    .e_tag(part.e_tag)
                    .part_number(part.part_number as i32)
                    .build()
            })
            .collect::<Vec<_>>();

        self.inner
            .client
            .complete_multipart_upload()
            .bucket(&self.inner.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    crate::error::MultipartUploadNotFoundSnafu { key, upload_id }.build()
                } else {
                    crate::error::CompleteMultipartUploadSnafu {
                        bucket: self.inner.bucket.clone(),
                        key,
                    }
                    .into_error(e)
                }
            })?;

        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.inner.bucket))]
    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        self.inner
            .client
            .abort_multipart_upload()
            .bucket(&self.inner.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    crate::error::MultipartUploadNotFoundSnafu { key, upload_id }.build()
                } else {
                    crate::error::AbortMultipartUploadSnafu {
                        bucket: self.inner.bucket.clone(),
                        key,
                    }
                    .into_error(e)
                }
            })?;

        Ok(())
    }

    #[instrument(skip(self, data), fields(bucket = %self.inner.bucket, size = data.len()))]
    async fn put_incomplete_part(&self, key: &str, data: Bytes) -> Result<()> {
        self.put(&Self::incomplete_part_key(key), data).await
    }

    async fn get_incomplete_part(&self, key: &str) -> Result<Option<Bytes>> {
        self.get(&Self::incomplete_part_key(key)).await
    }

    async fn delete_incomplete_part(&self, key: &str) -> Result<()> {
        self.delete(&Self::incomplete_part_key(key)).await
    }

    #[instrument(skip(self, data), fields(bucket = %self.inner.bucket, size = data.len()))]
    async fn put_object(&self, key: &str, data: Bytes) -> Result<()> {
        self.put(key, data).await
    }

    async fn get_object(&self, key: &str) -> Result<Option<Bytes>> {
        self.get(key).await
    }

    #[instrument(skip(self), fields(bucket = %self.inner.bucket))]
    async fn delete_object(&self, key: &str) -> Result<()> {
        self.delete(key).await
    }

    fn is_reserved_key(&self, key: &str) -> bool {
        key.starts_with(INCOMPLETE_PART_PREFIX)
    }
}

impl std::fmt::Debug for S3Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Store")
            .field("bucket", &self.inner.bucket)
            .field("client", &"<...>")
            .finish()
    }
}

/// S3 reports a missing key or multipart upload as an HTTP 404, whatever the operation
fn is_not_found<E>(err: &SdkError<E>) -> bool {
    matches!(err, SdkError::ServiceError(e) if e.raw().status().as_u16() == 404)
}

async fn make_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let region_provider = if let Some(region) = &config.aws_region {
        RegionProviderChain::first_try(Region::new(region.clone()))
    } else {
        // No explicit region; use the environment
        RegionProviderChain::default_provider().or_else("us-east-1")
    };

    let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);
    if let (Some(access_key_id), Some(secret_access_key)) =
        (&config.aws_access_key_id, &config.aws_secret_access_key)
    {
        loader = loader.credentials_provider(Credentials::new(
            access_key_id,
            secret_access_key,
            None,
            None,
            "tuscache",
        ));
    }
    let aws_config = loader.load().await;

    let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);
    if let Some(s3_endpoint) = &config.s3_endpoint {
        s3_config_builder = s3_config_builder
            .endpoint_url(s3_endpoint.to_string())
            .force_path_style(true);
    }

    aws_sdk_s3::Client::from_conf(s3_config_builder.build())
}
