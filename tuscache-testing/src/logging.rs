//! Per-test log capture.
//!
//! The cache does most of its work in spawned tasks, so the usual approach of installing a
//! subscriber on the test thread misses most of the interesting events.  [`test_with_logging`]
//! instead builds a runtime whose worker threads all log to the same per-test buffer.
use crate::Result;
use std::{
    cell::RefCell,
    future::Future,
    io::Write,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing_subscriber::fmt::MakeWriter;

/// Default filter when `RUST_LOG` isn't set.  The AWS SDK and its HTTP stack are very chatty at
/// debug level.
const DEFAULT_FILTER: &str = "h2=warn,hyper=info,rustls=info,aws=info,tuscache=trace,debug";

/// Collects the formatted log output of one test
#[derive(Clone, Default)]
struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Everything captured so far, leaving the buffer empty
    fn drain(&self) -> String {
        let bytes = std::mem::take(&mut *self.buffer.lock().unwrap());

        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl<'a> Write for &'a LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = &'a Self;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

fn make_dispatch(capture: LogCapture) -> Result<tracing::Dispatch> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let format = fmt::layer()
        .with_level(true)
        .with_target(true)
        // Background flushes and foreground writes interleave; thread IDs help tell them apart
        .with_thread_ids(true)
        .with_thread_names(false)
        .with_writer(capture);

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(DEFAULT_FILTER)?,
    };

    Ok(tracing::Dispatch::new(
        tracing_subscriber::registry().with(filter).with(format),
    ))
}

/// Run an async test with logging enabled, in place of `#[tokio::test]`.
///
/// The test runs on a dedicated multi-threaded runtime.  Every thread of that runtime logs to a
/// buffer belonging to this test only, which is printed when the test finishes, whether it passed,
/// failed, or panicked.  That keeps the output of tests running in parallel from being mixed
/// together.
pub fn test_with_logging(test: impl Future<Output = Result<()>>) -> Result<()> {
    std::thread_local! {
        static WORKER_DISPATCH: RefCell<Option<tracing::subscriber::DefaultGuard>> = RefCell::new(None);
    }

    let capture = LogCapture::default();
    let dispatch = make_dispatch(capture.clone())?;

    let outcome = tracing::dispatcher::with_default(&dispatch, || {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all();

        let worker_dispatch = dispatch.clone();
        builder.on_thread_start(move || {
            let guard = tracing::dispatcher::set_default(&worker_dispatch);
            WORKER_DISPATCH.with(|cell| cell.replace(Some(guard)));
        });
        builder.on_thread_stop(|| {
            WORKER_DISPATCH.with(|cell| cell.replace(None));
        });

        let runtime = builder.build()?;

        // Test futures aren't required to be unwind safe; a panic here only ends up re-raised
        // after the logs are printed
        Ok::<_, color_eyre::Report>(std::panic::catch_unwind(AssertUnwindSafe(move || {
            let result = runtime.block_on(test);
            runtime.shutdown_timeout(Duration::from_secs(10));
            result
        })))
    })?;

    println!("Log events from this test: \n{}", capture.drain());

    match outcome {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
