use crate::Result;
use assert_matches::assert_matches;
use bytes::Bytes;
use std::collections::BTreeMap;
use tuscache::{
    FileMetadataStore, ObjectStore, S3Store, TusCacheError, UploadCache, INCOMPLETE_PART_PREFIX,
};
use tuscache_testing::{minio::MinioServer, test_data};

async fn s3_store(server: &MinioServer, bucket: &str) -> Result<S3Store> {
    Ok(S3Store::with_client(server.aws_client().await?, bucket))
}

#[test]
#[ignore = "requires minio"]
fn multipart_upload_lifecycle() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let server = MinioServer::get().await?;
        let bucket = server.create_bucket("multipart_upload_lifecycle").await?;
        let store = s3_store(&server, &bucket).await?;

        let first = test_data::random_data(1, 5 * 1024 * 1024);
        let second = test_data::random_data(2, 1000);

        let upload_id = store.create_multipart_upload("object").await?;
        let part2 = store
            .upload_part("object", &upload_id, 2, second.clone())
            .await?;
        let part1 = store
            .upload_part("object", &upload_id, 1, first.clone())
            .await?;

        let mut listed = store.list_parts("object", &upload_id).await?;
        listed.sort_by_key(|part| part.part_number);
        assert_eq!(vec![part1.clone(), part2.clone()], listed);

        store
            .complete_multipart_upload("object", &upload_id, vec![part1, part2])
            .await?;

        let object = store.get_object("object").await?.expect("object exists");
        assert_eq!([first, second].concat(), object);

        // The upload is gone once completed
        let result = store.list_parts("object", &upload_id).await;
        assert!(result.expect_err("upload was completed").is_not_found());

        Ok(())
    })
}

#[test]
#[ignore = "requires minio"]
fn aborted_upload_is_not_found() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let server = MinioServer::get().await?;
        let bucket = server.create_bucket("aborted_upload_is_not_found").await?;
        let store = s3_store(&server, &bucket).await?;

        let upload_id = store.create_multipart_upload("object").await?;
        store.abort_multipart_upload("object", &upload_id).await?;

        let err = store
            .abort_multipart_upload("object", &upload_id)
            .await
            .expect_err("upload was already aborted");
        assert_matches!(err, TusCacheError::MultipartUploadNotFound { .. });

        Ok(())
    })
}

#[test]
#[ignore = "requires minio"]
fn incomplete_parts() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let server = MinioServer::get().await?;
        let bucket = server.create_bucket("incomplete_parts").await?;
        let store = s3_store(&server, &bucket).await?;

        assert_eq!(None, store.get_incomplete_part("object").await?);
        store.delete_incomplete_part("object").await?;

        store
            .put_incomplete_part("object", Bytes::from_static(b"parked"))
            .await?;
        assert_eq!(
            Some(Bytes::from_static(b"parked")),
            store.get_incomplete_part("object").await?
        );

        // It's not the object itself, nor an object an upload could be named after
        assert_eq!(None, store.get_object("object").await?);
        assert_eq!(None, store.get_object("object.part").await?);
        assert_eq!(
            Some(Bytes::from_static(b"parked")),
            store
                .get_object(&format!("{INCOMPLETE_PART_PREFIX}object"))
                .await?
        );

        store.delete_incomplete_part("object").await?;
        assert_eq!(None, store.get_incomplete_part("object").await?);

        Ok(())
    })
}

#[test]
#[ignore = "requires minio"]
fn upload_through_cache() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let server = MinioServer::get().await?;
        let bucket = server.create_bucket("upload_through_cache").await?;
        let temp_dir = tempfile::tempdir()?;
        let config = server.config(temp_dir.path());

        let store = S3Store::new(&config, &bucket).await;
        let metadata = FileMetadataStore::new(config.metadata_dir.clone()).await?;
        let cache = UploadCache::new(config, Box::new(store.clone()), Box::new(metadata)).await?;

        // A bit over two parts, in 1MiB writes
        let data = test_data::random_data(3, 11 * 1024 * 1024 + 17);
        cache
            .create("tenant/upload", Some(data.len() as u64), BTreeMap::new())
            .await?;

        let mut offset = 0;
        for chunk in test_data::chunks(&data, 1024 * 1024) {
            offset = cache.write("tenant/upload", offset, &chunk[..]).await?;
        }

        assert!(cache.get_offset("tenant/upload").await?.completed);
        assert_eq!(
            Some(data),
            store.get_object("tenant/upload").await?
        );
        assert_eq!(None, store.get_incomplete_part("tenant/upload").await?);

        Ok(())
    })
}
