use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, WrapErr};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info};
use tuscache::{FileMetadataStore, S3Store, UploadCache};

mod progress;

/// Operate the tuscache upload cache: push files through it into S3, inspect and remove uploads,
/// and run the sweeper that evicts abandoned uploads.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Operation to perform
    #[clap(subcommand)]
    command: Command,

    #[clap(flatten)]
    globals: Globals,
}

/// Arguments that apply regardless of command
#[derive(Parser, Debug)]
struct Globals {
    /// The S3 bucket that completed uploads are stored in
    #[clap(long, global = true, env = "TUSCACHE_BUCKET")]
    bucket: Option<String>,

    /// Enable verbose log output
    #[clap(short = 'v', long, conflicts_with = "quiet", global = true)]
    verbose: bool,

    /// Be quiet, suppress almost all output (except errors)
    #[clap(short = 'q', long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[clap(flatten)]
    config: tuscache::Config,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evict uploads that have been idle longer than the session TTL.
    ///
    /// Runs until interrupted with Ctrl-C, unless `--once` is given.
    ///
    /// NOTE: starting the cache discards every file in the buffer directory, so don't point this
    /// at the buffer directory of a cache that's serving uploads.
    Sweep {
        /// Sweep once and exit
        #[clap(long)]
        once: bool,
    },

    /// Show the offset and size of an upload
    Status {
        /// The upload ID
        id: String,
    },

    /// Delete an upload.
    ///
    /// An upload in progress is aborted.  If the upload was completed, its object is deleted.
    Remove {
        /// The upload ID
        id: String,
    },

    /// Upload a file through the cache.
    ///
    /// If an upload with this ID already exists it's resumed from its current offset.
    Upload {
        /// The file to upload
        #[clap(value_parser)]
        file: PathBuf,

        /// The upload ID, which is also the key of the resulting S3 object
        #[clap(long)]
        id: String,

        /// Size of each write, like a resumable upload client's request size.
        ///
        /// Can be specified as an integer, ie "1000000", or with a suffix ie "1MB".
        #[clap(long, default_value = "1MiB")]
        chunk_size: byte_unit::Byte,
    },
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    init_logging(&args.globals)?;

    debug!(
        version = env!("CARGO_PKG_VERSION"),
        target = env!("VERGEN_CARGO_TARGET_TRIPLE"),
        "Starting"
    );

    let cache = make_cache(&args.globals).await?;

    match args.command {
        Command::Sweep { once } => {
            let sweeper = cache.sweeper();

            if once {
                let report = progress::with_spinner(&args.globals, "Sweeping...", sweeper.sweep_once())
                    .await;
                println!(
                    "evicted: {}  deferred: {}  stray files removed: {}  errors: {}",
                    report.evicted, report.deferred, report.stray_files_removed, report.errors
                );
            } else {
                sweeper
                    .run(async {
                        if let Err(e) = tokio::signal::ctrl_c().await {
                            tracing::error!(err = ?e, "Failed to listen for Ctrl-C; stopping");
                        }
                    })
                    .await;
            }
        }
        Command::Status { id } => {
            let info = cache.get_offset(&id).await?;
            let size = info
                .size
                .map_or_else(|| "unknown".to_string(), |size| size.to_string());

            println!("{}", info.id);
            println!("  offset:    {}", info.offset);
            println!("  size:      {size}");
            println!("  completed: {}", info.completed);
            if let Some(chunks) = cache.pending_chunks(&id) {
                println!("  pending:   {chunks} chunk(s)");
            }
        }
        Command::Remove { id } => {
            cache.remove(&id).await?;
            if !args.globals.quiet {
                println!("Removed upload {id}");
            }
        }
        Command::Upload {
            file,
            id,
            chunk_size,
        } => upload_file(&args.globals, &cache, file, &id, chunk_size).await?,
    }

    Ok(())
}

fn init_logging(globals: &Globals) -> color_eyre::Result<()> {
    use tracing_subscriber::EnvFilter;

    let default_level = if globals.verbose {
        "tuscache=debug,info"
    } else if globals.quiet {
        "error"
    } else {
        "warn"
    };

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_level)?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

async fn make_cache(globals: &Globals) -> color_eyre::Result<UploadCache> {
    let bucket = globals
        .bucket
        .clone()
        .ok_or_else(|| eyre!("An S3 bucket is required; use --bucket or TUSCACHE_BUCKET"))?;

    let config = globals.config.clone();
    let store = S3Store::new(&config, bucket).await;
    let metadata = FileMetadataStore::new(config.metadata_dir.clone()).await?;

    Ok(UploadCache::new(config, Box::new(store), Box::new(metadata)).await?)
}

async fn upload_file(
    globals: &Globals,
    cache: &UploadCache,
    path: PathBuf,
    id: &str,
    chunk_size: byte_unit::Byte,
) -> color_eyre::Result<()> {
    let mut file = tokio::fs::File::open(&path)
        .await
        .wrap_err_with(|| format!("Failed to open {}", path.display()))?;
    let size = file.metadata().await?.len();

    let mut offset = match cache.get_offset(id).await {
        Ok(info) if info.completed => {
            println!("Upload {id} is already complete");
            return Ok(());
        }
        Ok(info) => {
            ensure_same_size(id, info.size, size)?;
            info!(id, offset = info.offset, "Resuming existing upload");

            if info.size.is_none() {
                cache.declare_length(id, size).await?;
            }
            info.offset
        }
        Err(tuscache::TusCacheError::UnknownUpload { .. }) => {
            let mut metadata = BTreeMap::new();
            if let Some(name) = path.file_name() {
                metadata.insert("filename".to_string(), name.to_string_lossy().into_owned());
            }
            metadata.insert("uploaded_at".to_string(), chrono::Utc::now().to_rfc3339());

            cache.create(id, Some(size), metadata).await?.offset
        }
        Err(e) => return Err(e.into()),
    };

    let chunk_size = (chunk_size.get_bytes() as u64).max(1);
    let progress = progress::UploadProgress::new(globals, id, size, offset);

    while offset < size {
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let chunk = (&mut file).take(chunk_size);

        offset = cache.write(id, offset, chunk).await?;
        progress.set_position(offset);
    }

    progress.finish();

    if !globals.quiet {
        println!("Uploaded {} ({size} bytes) as {id}", path.display());
    }

    Ok(())
}

fn ensure_same_size(id: &str, declared: Option<u64>, size: u64) -> color_eyre::Result<()> {
    match declared {
        Some(declared) if declared != size => Err(eyre!(
            "Upload {id} was created with a size of {declared} bytes but the file is {size} bytes"
        )),
        _ => Ok(()),
    }
}
