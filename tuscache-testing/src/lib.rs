//! Testing helpers for use writing unit and integration tests of the `tuscache` crate
//!
//! This is internal to `tuscache` and is not intended for use by any other crates.  Breaking
//! changes can be made at any time.  The only reason this is published at all is that `cargo
//! publish` requires that all `dev-dependencies` be resolvable in the public registry.
pub mod harness;
pub mod logging;
pub mod memory;
pub mod minio;
pub mod test_data;

pub use harness::{test_config, TestCache};
pub use memory::MemoryStore;

/// Test code that reports errors can just cheat and use `eyre`
pub type Result<T> = color_eyre::Result<T>;
