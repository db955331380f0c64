#![doc = include_str!("../README.md")]

mod backpressure;
mod buffer;
mod cache;
mod config;
mod error;
mod finalize;
mod flusher;
mod metadata;
mod objstore;
mod registry;
mod session;
mod sweeper;
mod util;

pub use cache::{UploadCache, UploadInfo};
pub use config::Config;
pub use error::{Result, TusCacheError};
pub use metadata::{FileMetadataStore, IncompletePart, MetadataStore, UploadMetadata};
pub use objstore::{ObjectStore, PartRecord, S3Store, INCOMPLETE_PART_PREFIX};
pub use session::SessionState;
pub use sweeper::{SweepReport, Sweeper};
