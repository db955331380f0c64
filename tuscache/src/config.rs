use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// The configuration settings that control the upload cache and its connection to object storage.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::Parser))]
pub struct Config {
    /// Directory holding the local buffer files of in-progress uploads.
    ///
    /// Everything in this directory is deleted when the cache starts, so it must not be shared
    /// with anything else.
    #[cfg_attr(
        feature = "clap",
        clap(long, default_value_os_t = default_buffer_dir(), global = true, value_name = "DIR")
    )]
    pub buffer_dir: PathBuf,

    /// Directory holding the JSON metadata record of each upload.
    #[cfg_attr(
        feature = "clap",
        clap(long, default_value_os_t = default_metadata_dir(), global = true, value_name = "DIR")
    )]
    pub metadata_dir: PathBuf,

    /// The minimum size of a part flushed to object storage.
    ///
    /// Buffered data is flushed as soon as at least this much has accumulated.  S3 rejects parts
    /// smaller than 5MiB other than the last part of an upload, so this can't be set any lower
    /// than that when using S3.
    ///
    /// Can be specified as an integer, ie "10000000", or with a suffix ie "10MB".
    #[cfg_attr(feature = "clap", clap(long, default_value = "8MiB", global = true))]
    pub min_part_size: byte_unit::Byte,

    /// The maximum amount of a single write buffered as one chunk.
    ///
    /// Larger writes are split into chunks of this size, each flushed as its own part, so a client
    /// sending a whole file in one request doesn't produce one enormous part.  S3 rejects parts
    /// over 5GiB.  Values below `min_part_size` are raised to it.
    #[cfg_attr(feature = "clap", clap(long, default_value = "64MiB", global = true))]
    pub max_part_size: byte_unit::Byte,

    /// The maximum number of buffered chunks an upload may accumulate while waiting to be
    /// flushed.
    ///
    /// Writes beyond this wait until a flush completes, so local disk usage per upload is bounded
    /// by this many chunks of `min_part_size`.
    #[cfg_attr(feature = "clap", clap(long, default_value = "2", global = true))]
    pub max_pending_chunks: usize,

    /// How long an upload may sit idle before the sweeper aborts it, in seconds.
    #[cfg_attr(
        feature = "clap",
        clap(long = "session-ttl-secs", value_parser = parse_seconds, default_value = "172800", global = true, value_name = "SECONDS")
    )]
    pub session_ttl: Duration,

    /// How often the sweeper looks for abandoned uploads, in seconds.
    #[cfg_attr(
        feature = "clap",
        clap(long = "sweep-interval-secs", value_parser = parse_seconds, default_value = "60", global = true, value_name = "SECONDS")
    )]
    pub sweep_interval: Duration,

    /// Use a custom S3 endpoint instead of AWS.
    ///
    /// Use this to operate on a non-Amazon S3-compatible service.  Path-style addressing is used
    /// when this is set.
    #[cfg_attr(feature = "clap", clap(long, global = true, value_name = "URL"))]
    pub s3_endpoint: Option<Url>,

    /// The AWS region of the bucket.
    ///
    /// If not set, the region is taken from the usual AWS environment variables and config files.
    #[cfg_attr(feature = "clap", clap(long, global = true))]
    pub aws_region: Option<String>,

    /// The AWS access key ID, when not using the default credentials chain.
    #[cfg_attr(feature = "clap", clap(long, global = true, requires = "aws_secret_access_key"))]
    pub aws_access_key_id: Option<String>,

    /// The AWS secret access key, when not using the default credentials chain.
    #[cfg_attr(feature = "clap", clap(long, global = true, requires = "aws_access_key_id"))]
    pub aws_secret_access_key: Option<String>,
}

impl Config {
    /// `min_part_size` in bytes
    pub(crate) fn min_part_size_bytes(&self) -> u64 {
        (self.min_part_size.get_bytes() as u64).max(1)
    }

    /// `max_part_size` in bytes, never less than `min_part_size`
    pub(crate) fn max_part_size_bytes(&self) -> u64 {
        (self.max_part_size.get_bytes() as u64).max(self.min_part_size_bytes())
    }

    pub(crate) fn pending_chunk_cap(&self) -> usize {
        self.max_pending_chunks.max(1)
    }

    /// `sweep_interval`, but never zero
    pub(crate) fn sweep_period(&self) -> Duration {
        self.sweep_interval.max(Duration::from_millis(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        // XXX: This is duplicated here and in the `clap` attributes.  The lib crate doesn't
        // unconditionally depend on clap so there's no way to share them.
        Self {
            buffer_dir: default_buffer_dir(),
            metadata_dir: default_metadata_dir(),
            min_part_size: byte_unit::Byte::from_bytes(8 * 1024 * 1024),
            max_part_size: byte_unit::Byte::from_bytes(64 * 1024 * 1024),
            max_pending_chunks: 2,
            session_ttl: Duration::from_secs(2 * 24 * 60 * 60),
            sweep_interval: Duration::from_secs(60),
            s3_endpoint: None,
            aws_region: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
        }
    }
}

fn default_buffer_dir() -> PathBuf {
    std::env::temp_dir().join("tuscache").join("buffers")
}

fn default_metadata_dir() -> PathBuf {
    std::env::temp_dir().join("tuscache").join("metadata")
}

#[cfg(feature = "clap")]
fn parse_seconds(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|e| format!("'{value}' is not a number of seconds: {e}"))?;

    Duration::try_from_secs_f64(seconds).map_err(|e| format!("'{value}' is not a valid duration: {e}"))
}
