//! Ephemeral `minio` servers, for testing against S3-compatible object storage without an AWS
//! account.
use crate::Result;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_types::region::Region;
use color_eyre::eyre::eyre;
use duct::Handle;
use once_cell::sync::Lazy;
use rand::prelude::*;
use regex::Regex;
use std::{
    net::{SocketAddr, TcpListener},
    path::{Path, PathBuf},
    sync::{Arc, Weak},
    time::Duration,
};
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::debug;
use which::which;

const ACCESS_KEY: &str = "minioadmin";
const SECRET_KEY: &str = "minioadmin";
const REGION: &str = "us-east-1";

pub struct MinioServer {
    // Holds the server's data; deleted when the server is dropped
    _data_dir: TempDir,
    handle: Handle,
    endpoint: SocketAddr,
}

impl MinioServer {
    /// Get the server shared by all tests in this process, starting it if it isn't running.
    ///
    /// Starting minio takes a while, so sharing one server is much faster than [`Self::start`]
    /// in every test.
    pub async fn get() -> Result<Arc<Self>> {
        // Held across `start().await`, so it has to be a tokio mutex
        static SHARED: Lazy<Mutex<Weak<MinioServer>>> = Lazy::new(|| Mutex::new(Weak::new()));

        let mut shared = SHARED.lock().await;

        let server = match shared.upgrade() {
            Some(server) => server,
            None => {
                let server = Arc::new(Self::start().await?);
                *shared = Arc::downgrade(&server);
                server
            }
        };

        debug!(endpoint = %server.endpoint, "Using shared minio server");

        server.wait_for_service_start().await?;

        Ok(server)
    }

    /// Start a new minio server on a free local port.
    ///
    /// The `minio` binary is taken from the `MINIO_PATH` env var if set, otherwise from `PATH`.
    pub async fn start() -> Result<Self> {
        let path = Self::find_minio()?;
        let endpoint = Self::free_endpoint()?;
        let data_dir = Self::data_dir()?;

        let handle = duct::cmd!(
            path,
            "server",
            data_dir.path(),
            "--address",
            endpoint.to_string(),
            "--quiet"
        )
        .start()?;

        let server = Self {
            _data_dir: data_dir,
            handle,
            endpoint,
        };

        debug!(endpoint = %server.endpoint, "Waiting for minio to start");
        server.wait_for_service_start().await?;
        debug!(endpoint = %server.endpoint, "Minio started");

        Ok(server)
    }

    /// The S3 API endpoint URL where the server is listening
    pub fn endpoint_url(&self) -> url::Url {
        format!("http://{}/", self.endpoint)
            .parse()
            .expect("BUG: socket address doesn't make a valid URL")
    }

    /// An S3 client configured to use this server
    pub async fn aws_client(&self) -> Result<aws_sdk_s3::Client> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(REGION))
            .credentials_provider(Credentials::from_keys(ACCESS_KEY, SECRET_KEY, None))
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
            .endpoint_url(self.endpoint_url().to_string())
            .force_path_style(true)
            .build();

        Ok(aws_sdk_s3::Client::from_conf(s3_config))
    }

    /// Cache config which points at this server, with local directories under `root`
    pub fn config(&self, root: &Path) -> tuscache::Config {
        tuscache::Config {
            s3_endpoint: Some(self.endpoint_url()),
            aws_region: Some(REGION.to_string()),
            aws_access_key_id: Some(ACCESS_KEY.to_string()),
            aws_secret_access_key: Some(SECRET_KEY.to_string()),
            // S3 doesn't accept smaller parts, and minio enforces the same limit
            min_part_size: byte_unit::Byte::from_bytes(5 * 1024 * 1024),
            ..crate::test_config(root)
        }
    }

    /// Make a new bucket for a test.
    ///
    /// A random prefix is added to the name since many tests share the same server.
    pub async fn create_bucket(&self, name: impl AsRef<str>) -> Result<String> {
        // Bucket names are at most 63 characters of letters, digits, `.` and `-`
        static INVALID: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"[^0-9a-zA-Z\.\-]+").expect("BUG: invalid regex"));

        let name = INVALID.replace_all(name.as_ref(), "-");
        let name = &name[..name.len().min(63 - 9)];
        let bucket = format!("{:08x}-{name}", rand::thread_rng().next_u32());

        debug!(%bucket, "Creating bucket");

        let client = self.aws_client().await?;
        client.create_bucket().bucket(&bucket).send().await?;

        // Minio sometimes reports a new bucket as missing for a moment after creating it
        let policy = again::RetryPolicy::exponential(Duration::from_millis(100))
            .with_max_retries(10)
            .with_max_delay(Duration::from_secs(1));

        policy
            .retry(|| client.head_bucket().bucket(&bucket).send())
            .await
            .map_err(|e| eyre!("Bucket {bucket} isn't accessible after it was created: {e}"))?;

        Ok(bucket)
    }

    async fn wait_for_service_start(&self) -> Result<()> {
        let policy = again::RetryPolicy::exponential(Duration::from_millis(100))
            .with_max_retries(10)
            .with_max_delay(Duration::from_secs(1));

        let client = self.aws_client().await?;

        policy
            .retry(|| client.list_buckets().send())
            .await
            .map_err(|e| eyre!("Minio didn't come online in time.  Last ListBuckets error: {e}"))?;

        Ok(())
    }

    fn find_minio() -> Result<PathBuf> {
        std::env::var_os("MINIO_PATH")
            .map(PathBuf::from)
            .or_else(|| which("minio").ok())
            .ok_or_else(|| {
                eyre!("Unable to find `minio`; set MINIO_PATH or put the minio executable in PATH")
            })
    }

    fn free_endpoint() -> Result<SocketAddr> {
        let listener = TcpListener::bind("127.0.0.1:0")?;

        Ok(listener.local_addr()?)
    }

    /// Minio refuses data directories on `tmpfs`, which `/tmp` often is, so the data goes under the
    /// home directory instead
    fn data_dir() -> Result<TempDir> {
        let home = dirs::home_dir().ok_or_else(|| eyre!("Unable to determine home directory"))?;

        Ok(tempfile::tempdir_in(home)?)
    }
}

impl Drop for MinioServer {
    fn drop(&mut self) {
        debug!(pids = ?self.handle.pids(), "Killing minio");

        if let Err(e) = self.handle.kill() {
            eprintln!("Error killing minio process: {e}");
        }
    }
}
