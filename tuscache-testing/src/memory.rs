//! In-memory [`ObjectStore`] for tests which need to control and inspect what object storage does
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tuscache::{ObjectStore, PartRecord, TusCacheError, INCOMPLETE_PART_PREFIX};

#[derive(Debug, Default)]
struct MultipartUpload {
    key: String,
    parts: BTreeMap<u32, Bytes>,
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<String, Bytes>,
    incomplete_parts: HashMap<String, Bytes>,

    /// Open multipart uploads, keyed by upload ID
    uploads: HashMap<String, MultipartUpload>,
    uploads_created: usize,
    aborted_keys: Vec<String>,

    /// Part numbers passed to each completed multipart upload, by key
    completed_parts: HashMap<String, Vec<u32>>,

    /// Sizes of those parts, in the same order
    completed_part_sizes: HashMap<String, Vec<u64>>,

    fail_part_uploads: usize,
    fail_completions: usize,
    fail_incomplete_puts: usize,
    fail_incomplete_deletes: usize,

    /// Part uploads currently in flight, by key
    in_flight: HashMap<String, usize>,
    max_in_flight: usize,

    part_latency: Option<Duration>,
}

/// An [`ObjectStore`] which keeps everything in memory.
///
/// Besides storing things, it can be told to fail operations, to delay or hold part uploads, and
/// it records enough about what was done to it that tests can check the cache behaved.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    hold: Arc<watch::Sender<bool>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (hold, _) = watch::channel(false);

        Self {
            state: Default::default(),
            hold: Arc::new(hold),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Fail the next `count` part uploads
    pub fn fail_part_uploads(&self, count: usize) {
        self.state().fail_part_uploads = count;
    }

    /// Fail the next `count` attempts to complete a multipart upload
    pub fn fail_completions(&self, count: usize) {
        self.state().fail_completions = count;
    }

    /// Fail the next `count` attempts to store an incomplete part
    pub fn fail_incomplete_puts(&self, count: usize) {
        self.state().fail_incomplete_puts = count;
    }

    /// Fail the next `count` attempts to delete an incomplete part
    pub fn fail_incomplete_deletes(&self, count: usize) {
        self.state().fail_incomplete_deletes = count;
    }

    /// Make every part upload take at least this long
    pub fn set_part_latency(&self, latency: Duration) {
        self.state().part_latency = Some(latency);
    }

    /// Make part uploads wait until [`Self::release_uploads`] is called
    pub fn hold_uploads(&self) {
        self.hold.send_replace(true);
    }

    pub fn release_uploads(&self) {
        self.hold.send_replace(false);
    }

    /// The contents of a completed object
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.state().objects.get(key).cloned()
    }

    pub fn incomplete_part(&self, key: &str) -> Option<Bytes> {
        self.state().incomplete_parts.get(key).cloned()
    }

    /// Keys of multipart uploads that are neither completed nor aborted
    pub fn open_uploads(&self) -> Vec<String> {
        let mut keys = self
            .state()
            .uploads
            .values()
            .map(|upload| upload.key.clone())
            .collect::<Vec<_>>();
        keys.sort();
        keys
    }

    /// Number of parts uploaded so far to the open multipart upload of `key`
    pub fn uploaded_parts(&self, key: &str) -> usize {
        self.state()
            .uploads
            .values()
            .filter(|upload| upload.key == key)
            .map(|upload| upload.parts.len())
            .sum()
    }

    pub fn uploads_created(&self) -> usize {
        self.state().uploads_created
    }

    pub fn aborted_keys(&self) -> Vec<String> {
        self.state().aborted_keys.clone()
    }

    /// Part numbers the multipart upload of `key` was completed with
    pub fn completed_part_numbers(&self, key: &str) -> Option<Vec<u32>> {
        self.state().completed_parts.get(key).cloned()
    }

    /// Sizes of the parts the multipart upload of `key` was completed with
    pub fn completed_part_sizes(&self, key: &str) -> Option<Vec<u64>> {
        self.state().completed_part_sizes.get(key).cloned()
    }

    /// The most part uploads that were ever in flight at once for a single key
    pub fn max_concurrent_part_uploads(&self) -> usize {
        self.state().max_in_flight
    }

    async fn wait_for_release(&self) {
        let mut hold = self.hold.subscribe();

        // The sender lives as long as `self`, so this can't fail
        let _ = hold.wait_for(|held| !held).await;
    }

    fn upload_not_found(key: &str, upload_id: &str) -> TusCacheError {
        TusCacheError::MultipartUploadNotFound {
            key: key.to_string(),
            upload_id: upload_id.to_string(),
        }
    }
}

fn injected_failure(key: &str) -> TusCacheError {
    TusCacheError::ObjectStore {
        key: key.to_string(),
        source: "injected failure".into(),
    }
}

/// Consume one of the remaining injected failures, if there are any
fn take_failure(remaining: &mut usize) -> bool {
    if *remaining > 0 {
        *remaining -= 1;
        true
    } else {
        false
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn create_multipart_upload(&self, key: &str) -> tuscache::Result<String> {
        let mut state = self.state();
        state.uploads_created += 1;

        let upload_id = format!("upload-{}-{}", state.uploads_created, key);
        state.uploads.insert(
            upload_id.clone(),
            MultipartUpload {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );

        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> tuscache::Result<PartRecord> {
        let latency = {
            let mut state = self.state();
            let in_flight = state.in_flight.entry(key.to_string()).or_default();
            *in_flight += 1;
            let in_flight = *in_flight;
            state.max_in_flight = state.max_in_flight.max(in_flight);
            state.part_latency
        };

        self.wait_for_release().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state();
        if let Some(in_flight) = state.in_flight.get_mut(key) {
            *in_flight -= 1;
        }

        if take_failure(&mut state.fail_part_uploads) {
            return Err(injected_failure(key));
        }

        let upload = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| Self::upload_not_found(key, upload_id))?;
        let size = data.len() as u64;
        upload.parts.insert(part_number, data);

        Ok(PartRecord {
            part_number,
            size,
            e_tag: format!("\"etag-{part_number}\""),
        })
    }

    async fn list_parts(&self, key: &str, upload_id: &str) -> tuscache::Result<Vec<PartRecord>> {
        let state = self.state();
        let upload = state
            .uploads
            .get(upload_id)
            .ok_or_else(|| Self::upload_not_found(key, upload_id))?;

        Ok(upload
            .parts
            .iter()
            .map(|(part_number, data)| PartRecord {
                part_number: *part_number,
                size: data.len() as u64,
                e_tag: format!("\"etag-{part_number}\""),
            })
            .collect())
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<PartRecord>,
    ) -> tuscache::Result<()> {
        let mut state = self.state();

        if take_failure(&mut state.fail_completions) {
            return Err(injected_failure(key));
        }

        let upload = state
            .uploads
            .remove(upload_id)
            .ok_or_else(|| Self::upload_not_found(key, upload_id))?;

        let mut object = BytesMut::new();
        let mut sizes = Vec::with_capacity(parts.len());
        for part in &parts {
            let data = upload.parts.get(&part.part_number).ok_or_else(|| {
                TusCacheError::ObjectStore {
                    key: key.to_string(),
                    source: format!("part {} was never uploaded", part.part_number).into(),
                }
            })?;
            object.extend_from_slice(data);
            sizes.push(data.len() as u64);
        }

        state.objects.insert(key.to_string(), object.freeze());
        state.completed_parts.insert(
            key.to_string(),
            parts.iter().map(|part| part.part_number).collect(),
        );
        state.completed_part_sizes.insert(key.to_string(), sizes);

        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> tuscache::Result<()> {
        let mut state = self.state();

        state
            .uploads
            .remove(upload_id)
            .ok_or_else(|| Self::upload_not_found(key, upload_id))?;
        state.aborted_keys.push(key.to_string());

        Ok(())
    }

    async fn put_incomplete_part(&self, key: &str, data: Bytes) -> tuscache::Result<()> {
        let mut state = self.state();

        if take_failure(&mut state.fail_incomplete_puts) {
            return Err(injected_failure(key));
        }

        state.incomplete_parts.insert(key.to_string(), data);

        Ok(())
    }

    async fn get_incomplete_part(&self, key: &str) -> tuscache::Result<Option<Bytes>> {
        Ok(self.state().incomplete_parts.get(key).cloned())
    }

    async fn delete_incomplete_part(&self, key: &str) -> tuscache::Result<()> {
        let mut state = self.state();

        if take_failure(&mut state.fail_incomplete_deletes) {
            return Err(injected_failure(key));
        }

        state.incomplete_parts.remove(key);

        Ok(())
    }

    async fn put_object(&self, key: &str, data: Bytes) -> tuscache::Result<()> {
        self.state().objects.insert(key.to_string(), data);

        Ok(())
    }

    async fn get_object(&self, key: &str) -> tuscache::Result<Option<Bytes>> {
        Ok(self.object(key))
    }

    async fn delete_object(&self, key: &str) -> tuscache::Result<()> {
        self.state().objects.remove(key);

        Ok(())
    }

    /// Reserves the same keys as [`tuscache::S3Store`]
    fn is_reserved_key(&self, key: &str) -> bool {
        key.starts_with(INCOMPLETE_PART_PREFIX)
    }
}
