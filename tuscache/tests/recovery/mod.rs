//! Restarting the cache partway through uploads.
//!
//! Buffered data doesn't survive a restart, but anything that reached object storage does, and
//! uploads resume from there.
use crate::{wait_until, Result};
use assert_matches::assert_matches;
use std::collections::BTreeMap;
use tuscache::{FileMetadataStore, IncompletePart, MetadataStore, ObjectStore, TusCacheError};
use tuscache_testing::{test_data, TestCache};

#[test]
fn upload_resumes_from_flushed_parts() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let mut test = TestCache::new().await?;
        let data = test_data::random_data(1, 5000);

        test.cache.create("resumed", Some(5000), BTreeMap::new()).await?;
        test.cache.write("resumed", 0, &data[..1500]).await?;
        test.cache.write("resumed", 1500, &data[1500..1800]).await?;
        wait_until("the first part is flushed", || {
            test.store.uploaded_parts("resumed") == 1
        })
        .await;

        test.restart().await?;
        assert_eq!(0, test.buffer_files()?);

        // The 300 buffered bytes were lost with the process
        let info = test.cache.get_offset("resumed").await?;
        assert_eq!(1500, info.offset);
        assert_eq!(Some(5000), info.size);
        assert!(!info.completed);

        test.cache.write("resumed", 1500, &data[1500..]).await?;
        assert_eq!(Some(data), test.store.object("resumed"));
        assert_eq!(1, test.store.uploads_created());

        Ok(())
    })
}

#[test]
fn upload_resumes_with_incomplete_part() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let mut test = TestCache::new().await?;
        let data = test_data::random_data(2, 5000);

        test.cache.create("parked", Some(5000), BTreeMap::new()).await?;
        test.cache.write("parked", 0, &data[..1500]).await?;
        test.cache.write("parked", 1500, &data[1500..1600]).await?;
        test.cache.flush("parked").await?;

        test.restart().await?;

        assert_eq!(1600, test.cache.get_offset("parked").await?.offset);
        test.cache.write("parked", 1600, &data[1600..]).await?;

        assert_eq!(Some(data), test.store.object("parked"));
        assert_eq!(Some(vec![1, 2]), test.store.completed_part_numbers("parked"));
        assert_eq!(None, test.store.incomplete_part("parked"));

        Ok(())
    })
}

#[test]
fn leftover_incomplete_part_is_not_counted_twice() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let mut test = TestCache::new().await?;
        let data = test_data::random_data(3, 5000);

        test.cache.create("leftover", Some(5000), BTreeMap::new()).await?;
        test.cache.write("leftover", 0, &data[..100]).await?;
        test.cache.flush("leftover").await?;

        // The parked bytes go out in front of part 1, but deleting them afterwards fails
        test.store.fail_incomplete_deletes(1);
        test.cache.write("leftover", 100, &data[100..1200]).await?;
        test.cache.flush("leftover").await?;
        assert_eq!(1, test.store.uploaded_parts("leftover"));
        assert_eq!(Some(data.slice(..100)), test.store.incomplete_part("leftover"));

        test.restart().await?;

        assert_eq!(1200, test.cache.get_offset("leftover").await?.offset);
        test.cache.write("leftover", 1200, &data[1200..]).await?;

        assert_eq!(Some(data), test.store.object("leftover"));
        assert_eq!(Some(vec![1200, 3800]), test.store.completed_part_sizes("leftover"));
        assert_eq!(None, test.store.incomplete_part("leftover"));

        Ok(())
    })
}

#[test]
fn crash_after_incomplete_part_was_uploaded() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let mut test = TestCache::new().await?;
        let data = test_data::random_data(4, 5000);
        let metadata = FileMetadataStore::new(test.config.metadata_dir.clone()).await?;

        test.cache.create("interrupted", Some(5000), BTreeMap::new()).await?;
        test.cache.write("interrupted", 0, &data[..100]).await?;
        test.cache.flush("interrupted").await?;
        test.cache.write("interrupted", 100, &data[100..1200]).await?;
        test.cache.flush("interrupted").await?;

        // Put things back the way they'd be if the process died right after uploading part 1:
        // the record still lists the parked bytes, and they're still in object storage
        let mut record = metadata
            .load("interrupted")
            .await?
            .expect("upload is in progress");
        assert_eq!(None, record.incomplete_part);
        record.incomplete_part = Some(IncompletePart {
            size: 100,
            next_part_number: 1,
        });
        metadata.save(&record).await?;
        test.store
            .put_incomplete_part("interrupted", data.slice(..100))
            .await?;

        test.restart().await?;

        assert_eq!(1200, test.cache.get_offset("interrupted").await?.offset);
        test.cache.write("interrupted", 1200, &data[1200..]).await?;
        assert_eq!(Some(data), test.store.object("interrupted"));

        Ok(())
    })
}

#[test]
fn unrecorded_incomplete_part_bytes_are_resent() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let mut test = TestCache::new().await?;
        let data = test_data::random_data(5, 5000);
        let metadata = FileMetadataStore::new(test.config.metadata_dir.clone()).await?;

        test.cache.create("unrecorded", Some(5000), BTreeMap::new()).await?;
        test.cache.write("unrecorded", 0, &data[..100]).await?;
        test.cache.flush("unrecorded").await?;
        let parked_once = metadata
            .load("unrecorded")
            .await?
            .expect("upload is in progress");

        test.cache.write("unrecorded", 100, &data[100..300]).await?;
        test.cache.flush("unrecorded").await?;
        assert_eq!(Some(data.slice(..300)), test.store.incomplete_part("unrecorded"));

        // As if the process died after storing the bigger incomplete part but before recording it
        metadata.save(&parked_once).await?;

        test.restart().await?;

        assert_eq!(100, test.cache.get_offset("unrecorded").await?.offset);
        test.cache.write("unrecorded", 100, &data[100..]).await?;
        assert_eq!(Some(data), test.store.object("unrecorded"));

        Ok(())
    })
}

#[test]
fn restart_discards_buffer_files() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let mut test = TestCache::new().await?;

        test.cache.create("lost", Some(5000), BTreeMap::new()).await?;
        test.cache.write("lost", 0, &[0u8; 100][..]).await?;
        assert_eq!(1, test.buffer_files()?);

        test.restart().await?;

        assert_eq!(0, test.buffer_files()?);
        assert_eq!(0, test.cache.get_offset("lost").await?.offset);
        test.cache.write("lost", 0, &[0u8; 5000][..]).await?;
        assert!(test.store.object("lost").is_some());

        Ok(())
    })
}

#[test]
fn completed_upload_survives_restart() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let mut test = TestCache::new().await?;

        test.cache.create("kept", Some(10), BTreeMap::new()).await?;
        test.cache.write("kept", 0, &[9u8; 10][..]).await?;

        test.restart().await?;

        let info = test.cache.get_offset("kept").await?;
        assert!(info.completed);
        assert_eq!(10, info.offset);
        assert_eq!(10, test.cache.write("kept", 0, &[9u8; 10][..]).await?);

        Ok(())
    })
}

#[test]
fn vanished_multipart_upload_cant_be_resumed() -> Result<()> {
    tuscache_testing::logging::test_with_logging(async move {
        let mut test = TestCache::new().await?;

        test.cache.create("vanished", Some(5000), BTreeMap::new()).await?;
        test.cache.write("vanished", 0, &[0u8; 1500][..]).await?;
        test.cache.flush("vanished").await?;

        // Something outside the cache, like a bucket lifecycle rule, aborts the multipart upload
        let metadata = FileMetadataStore::new(test.config.metadata_dir.clone()).await?;
        let upload_id = metadata
            .load("vanished")
            .await?
            .and_then(|record| record.multipart_upload_id)
            .expect("multipart upload was started");
        test.store
            .abort_multipart_upload("vanished", &upload_id)
            .await?;

        test.restart().await?;

        assert_matches!(
            test.cache.get_offset("vanished").await,
            Err(TusCacheError::UnknownUpload { .. })
        );

        Ok(())
    })
}
