//! Uploads through the cache with object storage that behaves.
use crate::{wait_until, Result};
use assert_matches::assert_matches;
use bytes::Bytes;
use std::collections::BTreeMap;
use tuscache::{
    FileMetadataStore, MetadataStore, SessionState, TusCacheError, INCOMPLETE_PART_PREFIX,
};
use tuscache_testing::test_data::{self, FailingBody};
use tuscache_testing::TestCache;

/// Write `chunks` to the upload in order, starting at `offset`, returning the final offset
async fn write_all(
    test: &TestCache,
    id: &str,
    mut offset: u64,
    chunks: impl IntoIterator<Item = Bytes>,
) -> Result<u64> {
    for chunk in chunks {
        let expected = offset + chunk.len() as u64;
        offset = test.cache.write(id, offset, &chunk[..]).await?;
        assert_eq!(expected, offset);
    }

    Ok(offset)
}

#[test]
fn completed_upload_is_reported_from_metadata() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let test = TestCache::new().await?;

        test.cache.create("t1", Some(10), BTreeMap::new()).await?;
        assert_eq!(6, test.cache.write("t1", 0, &b"abcdef"[..]).await?);
        assert_eq!(10, test.cache.write("t1", 6, &b"ghij"[..]).await?);

        // The session is retired, so this is answered by the metadata store
        assert_eq!(None, test.cache.session_state("t1"));
        let info = test.cache.get_offset("t1").await?;
        assert!(info.completed);
        assert_eq!(10, info.offset);
        assert_eq!(Some(10), info.size);

        assert_eq!(
            Some(Bytes::from_static(b"abcdefghij")),
            test.store.object("t1")
        );

        Ok(())
    })
}

#[test]
fn small_writes_become_full_sized_parts() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let test = TestCache::new().await?;
        let data = test_data::random_data(1, 2500);

        let info = test.cache.create("parts", Some(2500), BTreeMap::new()).await?;
        assert_eq!(0, info.offset);
        assert!(!info.completed);

        // 500 byte writes against 1KiB parts: the third write seals 1500 bytes as part 1, and
        // the last write sends the remaining 1000 bytes as the final part
        let offset = write_all(&test, "parts", 0, test_data::chunks(&data, 500)).await?;
        assert_eq!(2500, offset);

        assert_eq!(Some(data), test.store.object("parts"));
        assert_eq!(Some(vec![1, 2]), test.store.completed_part_numbers("parts"));
        assert!(test.store.open_uploads().is_empty());
        assert_eq!(0, test.buffer_files()?);
        assert_eq!(None, test.cache.session_state("parts"));

        let info = test.cache.get_offset("parts").await?;
        assert!(info.completed);
        assert_eq!(2500, info.offset);
        assert_eq!(Some(2500), info.size);

        Ok(())
    })
}

#[test]
fn irregular_writes() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let test = TestCache::new().await?;
        let data = test_data::random_data(2, 20_000);

        test.cache
            .create("irregular", Some(20_000), BTreeMap::new())
            .await?;
        write_all(
            &test,
            "irregular",
            0,
            test_data::random_chunks(3, &data, 3000),
        )
        .await?;

        assert_eq!(Some(data), test.store.object("irregular"));

        // Every part but the last is at least the minimum part size
        let parts = test
            .store
            .completed_part_numbers("irregular")
            .expect("upload was completed");
        assert!(parts.len() > 1);
        assert_eq!((1..=parts.len() as u32).collect::<Vec<_>>(), parts);

        Ok(())
    })
}

#[test]
fn offset_includes_buffered_bytes() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let test = TestCache::new().await?;

        test.cache.create("buffered", Some(10_000), BTreeMap::new()).await?;
        let offset = test.cache.write("buffered", 0, &[0u8; 100][..]).await?;
        assert_eq!(100, offset);

        let info = test.cache.get_offset("buffered").await?;
        assert_eq!(100, info.offset);
        assert_eq!(Some(10_000), info.size);
        assert!(!info.completed);

        // Nothing has reached object storage yet
        assert_eq!(0, test.store.uploads_created());
        assert_eq!(None, test.store.incomplete_part("buffered"));
        assert_eq!(Some(SessionState::Receiving), test.cache.session_state("buffered"));
        assert_eq!(Some(0), test.cache.pending_chunks("buffered"));

        Ok(())
    })
}

#[test]
fn offset_mismatch_is_rejected() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let test = TestCache::new().await?;

        test.cache.create("mismatch", Some(100), BTreeMap::new()).await?;
        test.cache.write("mismatch", 0, &[1u8; 10][..]).await?;

        let result = test.cache.write("mismatch", 0, &[1u8; 10][..]).await;
        assert_matches!(
            result,
            Err(TusCacheError::OffsetMismatch {
                expected: 10,
                actual: 0,
                ..
            })
        );

        let result = test.cache.write("mismatch", 20, &[1u8; 10][..]).await;
        assert_matches!(
            result,
            Err(TusCacheError::OffsetMismatch {
                expected: 10,
                actual: 20,
                ..
            })
        );

        assert_eq!(10, test.cache.get_offset("mismatch").await?.offset);

        Ok(())
    })
}

#[test]
fn unknown_uploads() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let test = TestCache::new().await?;

        assert_matches!(
            test.cache.write("nope", 0, &b"data"[..]).await,
            Err(TusCacheError::UnknownUpload { .. })
        );
        assert_matches!(
            test.cache.get_offset("nope").await,
            Err(TusCacheError::UnknownUpload { .. })
        );
        assert_matches!(
            test.cache.remove("nope").await,
            Err(TusCacheError::UnknownUpload { .. })
        );
        assert_matches!(
            test.cache.declare_length("nope", 10).await,
            Err(TusCacheError::UnknownUpload { .. })
        );

        Ok(())
    })
}

#[test]
fn create_existing_upload_fails() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let test = TestCache::new().await?;

        test.cache.create("twice", Some(10), BTreeMap::new()).await?;
        assert_matches!(
            test.cache.create("twice", Some(10), BTreeMap::new()).await,
            Err(TusCacheError::UploadExists { .. })
        );

        // Also once it's completed
        test.cache.write("twice", 0, &[0u8; 10][..]).await?;
        assert_matches!(
            test.cache.create("twice", None, BTreeMap::new()).await,
            Err(TusCacheError::UploadExists { .. })
        );

        Ok(())
    })
}

#[test]
fn empty_upload_completes_immediately() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let test = TestCache::new().await?;

        let info = test.cache.create("empty", Some(0), BTreeMap::new()).await?;
        assert!(info.completed);
        assert_eq!(0, info.offset);

        assert_eq!(Some(Bytes::new()), test.store.object("empty"));
        assert_eq!(0, test.store.uploads_created());

        // An empty write to it is acknowledged
        assert_eq!(0, test.cache.write("empty", 0, &b""[..]).await?);

        Ok(())
    })
}

#[test]
fn write_stops_at_declared_size() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let test = TestCache::new().await?;
        let data = test_data::random_data(4, 20);

        test.cache.create("overlong", Some(10), BTreeMap::new()).await?;
        assert_eq!(10, test.cache.write("overlong", 0, &data[..]).await?);

        assert_eq!(Some(data.slice(..10)), test.store.object("overlong"));

        Ok(())
    })
}

#[test]
fn writes_after_completion_are_acknowledged() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let test = TestCache::new().await?;
        let data = test_data::random_data(5, 1500);

        test.cache.create("done", Some(1500), BTreeMap::new()).await?;
        assert_eq!(1500, test.cache.write("done", 0, &data[..]).await?);

        // A client that never saw the response resends the last write
        assert_eq!(1500, test.cache.write("done", 0, &data[..]).await?);
        assert_eq!(1500, test.cache.write("done", 1500, &b""[..]).await?);

        assert_eq!(Some(data), test.store.object("done"));
        assert_eq!(1, test.store.uploads_created());

        Ok(())
    })
}

#[test]
fn declare_length_later() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let test = TestCache::new().await?;
        let data = test_data::random_data(6, 1700);

        let info = test.cache.create("deferred", None, BTreeMap::new()).await?;
        assert_eq!(None, info.size);

        write_all(
            &test,
            "deferred",
            0,
            [data.slice(..1500), data.slice(1500..)],
        )
        .await?;

        assert_matches!(
            test.cache.declare_length("deferred", 1000).await,
            Err(TusCacheError::ExceedsDeclaredSize {
                declared: 1000,
                offset: 1700,
                ..
            })
        );

        // Everything has arrived, so declaring the length completes the upload
        let info = test.cache.declare_length("deferred", 1700).await?;
        assert!(info.completed);
        assert_eq!(Some(data), test.store.object("deferred"));

        assert_matches!(
            test.cache.declare_length("deferred", 1800).await,
            Err(TusCacheError::SizeAlreadyDeclared {
                declared: 1700,
                requested: 1800,
                ..
            })
        );
        test.cache.declare_length("deferred", 1700).await?;

        Ok(())
    })
}

#[test]
fn declare_length_before_last_write() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let test = TestCache::new().await?;
        let data = test_data::random_data(7, 3000);

        test.cache.create("declared", None, BTreeMap::new()).await?;
        test.cache.write("declared", 0, &data[..2000]).await?;

        let info = test.cache.declare_length("declared", 3000).await?;
        assert!(!info.completed);
        assert_eq!(Some(3000), info.size);

        test.cache.write("declared", 2000, &data[2000..]).await?;
        assert_eq!(Some(data), test.store.object("declared"));

        Ok(())
    })
}

#[test]
fn flush_parks_undersized_data_as_incomplete_part() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let test = TestCache::new().await?;
        let data = test_data::random_data(8, 5000);

        test.cache.create("flushed", Some(5000), BTreeMap::new()).await?;
        test.cache.write("flushed", 0, &data[..100]).await?;

        let info = test.cache.flush("flushed").await?;
        assert_eq!(100, info.offset);
        assert_eq!(Some(data.slice(..100)), test.store.incomplete_part("flushed"));
        assert_eq!(0, test.store.uploads_created());
        assert_eq!(0, test.buffer_files()?);

        // The next full part picks up the parked data in front of it
        test.cache.write("flushed", 100, &data[100..2100]).await?;
        test.cache.flush("flushed").await?;
        assert_eq!(None, test.store.incomplete_part("flushed"));
        assert_eq!(1, test.store.uploaded_parts("flushed"));

        test.cache.write("flushed", 2100, &data[2100..]).await?;
        assert_eq!(Some(data), test.store.object("flushed"));
        assert_eq!(Some(vec![1, 2]), test.store.completed_part_numbers("flushed"));

        Ok(())
    })
}

#[test]
fn declaring_length_uploads_parked_data() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let test = TestCache::new().await?;
        let data = test_data::random_data(20, 100);

        test.cache.create("parked-only", None, BTreeMap::new()).await?;
        test.cache.write("parked-only", 0, &data[..]).await?;
        test.cache.flush("parked-only").await?;
        assert_eq!(Some(data.clone()), test.store.incomplete_part("parked-only"));
        assert_eq!(0, test.store.uploads_created());

        // Every byte is already in object storage, but only as the incomplete part
        let info = test.cache.declare_length("parked-only", 100).await?;
        assert!(info.completed);
        assert_eq!(100, info.offset);

        assert_eq!(Some(data), test.store.object("parked-only"));
        assert_eq!(Some(vec![1]), test.store.completed_part_numbers("parked-only"));
        assert_eq!(None, test.store.incomplete_part("parked-only"));

        Ok(())
    })
}

#[test]
fn parked_data_is_the_last_part() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let test = TestCache::new().await?;
        let data = test_data::random_data(21, 1600);

        test.cache.create("tail", None, BTreeMap::new()).await?;
        test.cache.write("tail", 0, &data[..1500]).await?;
        test.cache.write("tail", 1500, &data[1500..]).await?;
        test.cache.flush("tail").await?;
        assert_eq!(1, test.store.uploaded_parts("tail"));
        assert_eq!(Some(data.slice(1500..)), test.store.incomplete_part("tail"));

        let info = test.cache.declare_length("tail", 1600).await?;
        assert!(info.completed);

        assert_eq!(Some(data), test.store.object("tail"));
        assert_eq!(Some(vec![1500, 100]), test.store.completed_part_sizes("tail"));
        assert_eq!(None, test.store.incomplete_part("tail"));

        let info = test.cache.get_offset("tail").await?;
        assert_eq!(1600, info.offset);
        assert_eq!(Some(1600), info.size);

        Ok(())
    })
}

#[test]
fn large_write_is_split_into_parts() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let test = TestCache::with_config(|config| {
            config.max_part_size = byte_unit::Byte::from_bytes(2048);
        })
        .await?;
        let data = test_data::random_data(22, 10_000);

        // The whole file in one request
        test.cache.create("whole", Some(10_000), BTreeMap::new()).await?;
        assert_eq!(10_000, test.cache.write("whole", 0, &data[..]).await?);

        assert_eq!(Some(data), test.store.object("whole"));
        assert_eq!(
            Some(vec![2048, 2048, 2048, 2048, 1808]),
            test.store.completed_part_sizes("whole")
        );
        assert_eq!(0, test.buffer_files()?);

        Ok(())
    })
}

#[test]
fn large_write_of_unknown_length_leaves_remainder_buffered() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let test = TestCache::with_config(|config| {
            config.max_part_size = byte_unit::Byte::from_bytes(2048);
        })
        .await?;
        let data = test_data::random_data(23, 5000);

        test.cache.create("streamed", None, BTreeMap::new()).await?;
        assert_eq!(5000, test.cache.write("streamed", 0, &data[..]).await?);

        // Two full chunks are flushed, and the last 904 bytes wait for more data
        wait_until("both full chunks are flushed", || {
            test.store.uploaded_parts("streamed") == 2
        })
        .await;
        assert_eq!(5000, test.cache.get_offset("streamed").await?.offset);

        test.cache.declare_length("streamed", 5000).await?;
        assert_eq!(Some(data), test.store.object("streamed"));
        assert_eq!(
            Some(vec![2048, 2048, 904]),
            test.store.completed_part_sizes("streamed")
        );

        Ok(())
    })
}

#[test]
fn reserved_upload_ids_are_rejected() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let test = TestCache::new().await?;
        let id = format!("{INCOMPLETE_PART_PREFIX}video");

        assert_matches!(
            test.cache.create(&id, Some(10), BTreeMap::new()).await,
            Err(TusCacheError::ReservedUploadId { .. })
        );

        // Only the prefix is reserved
        test.cache.create("video.part", Some(10), BTreeMap::new()).await?;

        Ok(())
    })
}

#[test]
fn failed_body_read_keeps_bytes_already_read() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let test = TestCache::new().await?;
        let data = test_data::random_data(9, 1000);

        test.cache.create("dropped", Some(1000), BTreeMap::new()).await?;

        let result = test
            .cache
            .write("dropped", 0, FailingBody::new(data.slice(..300)))
            .await;
        let err = result.expect_err("body failed");
        assert_matches!(err, TusCacheError::ReadUploadBody { written: 300, .. });
        assert!(err.is_retryable());

        // The client resumes from wherever the cache got to
        assert_eq!(300, test.cache.get_offset("dropped").await?.offset);
        test.cache.write("dropped", 300, &data[300..]).await?;

        assert_eq!(Some(data), test.store.object("dropped"));

        Ok(())
    })
}

#[test]
fn remove_upload_in_progress() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let test = TestCache::new().await?;

        test.cache.create("doomed", Some(5000), BTreeMap::new()).await?;
        test.cache.write("doomed", 0, &[7u8; 2000][..]).await?;
        test.cache.write("doomed", 2000, &[7u8; 100][..]).await?;
        test.cache.flush("doomed").await?;
        assert_eq!(vec!["doomed".to_string()], test.store.open_uploads());

        test.cache.remove("doomed").await?;

        assert!(test.store.open_uploads().is_empty());
        assert_eq!(vec!["doomed".to_string()], test.store.aborted_keys());
        assert_eq!(None, test.store.incomplete_part("doomed"));
        assert_eq!(0, test.buffer_files()?);
        assert_eq!(None, test.cache.session_state("doomed"));
        assert_matches!(
            test.cache.get_offset("doomed").await,
            Err(TusCacheError::UnknownUpload { .. })
        );

        // The ID can be used again
        test.cache.create("doomed", Some(1), BTreeMap::new()).await?;

        Ok(())
    })
}

#[test]
fn remove_completed_upload_deletes_object() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let test = TestCache::new().await?;

        test.cache.create("finished", Some(10), BTreeMap::new()).await?;
        test.cache.write("finished", 0, &[1u8; 10][..]).await?;
        assert!(test.store.object("finished").is_some());

        test.cache.remove("finished").await?;

        assert_eq!(None, test.store.object("finished"));
        assert_matches!(
            test.cache.get_offset("finished").await,
            Err(TusCacheError::UnknownUpload { .. })
        );

        Ok(())
    })
}

#[test]
fn metadata_is_persisted() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let test = TestCache::new().await?;
        let metadata = BTreeMap::from([
            ("filename".to_string(), "cat.gif".to_string()),
            ("filetype".to_string(), "image/gif".to_string()),
        ]);

        test.cache
            .create("described", Some(1200), metadata.clone())
            .await?;

        let store = FileMetadataStore::new(test.config.metadata_dir.clone()).await?;
        let record = store.load("described").await?.expect("record was saved");
        assert_eq!(metadata, record.metadata);
        assert_eq!(Some(1200), record.size);
        assert!(!record.completed);
        assert_eq!(None, record.multipart_upload_id);

        test.cache.write("described", 0, &[0u8; 1200][..]).await?;

        let record = store.load("described").await?.expect("record was kept");
        assert!(record.completed);
        assert!(record.completed_at.is_some());
        assert!(record.multipart_upload_id.is_some());
        assert_eq!(metadata, record.metadata);

        Ok(())
    })
}

/// Uploads don't interfere with one another
#[test]
fn concurrent_uploads() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let test = TestCache::new().await?;

        let uploads = (0..8u64)
            .map(|n| {
                let cache = test.cache.clone();
                let id = format!("tenant/upload-{n}");
                let data = test_data::random_data(100 + n, 5000 + n as usize * 300);

                tokio::spawn(async move {
                    cache
                        .create(&id, Some(data.len() as u64), BTreeMap::new())
                        .await?;

                    let mut offset = 0;
                    for chunk in test_data::random_chunks(n, &data, 700) {
                        offset = cache
                            .write(&id, offset, std::io::Cursor::new(chunk))
                            .await?;
                    }

                    Ok::<_, TusCacheError>((id, data))
                })
            })
            .collect::<Vec<_>>();

        for upload in uploads {
            let (id, data) = upload.await??;
            assert_eq!(Some(data), test.store.object(&id));
        }

        Ok(())
    })
}
