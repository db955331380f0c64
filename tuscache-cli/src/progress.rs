//! Progress bars for the CLI
use std::{borrow::Cow, future::Future, time::Duration};

/// Display a spinner while some long-running but unmeasurable task is running, then hide the
/// spinner when it finishes
pub(crate) async fn with_spinner<S, F, T>(globals: &super::Globals, message: S, task: F) -> T
where
    S: Into<Cow<'static, str>>,
    F: Future<Output = T>,
{
    let spinner = if hide_progress(globals) {
        indicatif::ProgressBar::hidden()
    } else {
        indicatif::ProgressBar::new_spinner()
    };

    spinner.set_style(
        indicatif::ProgressStyle::with_template("{spinner:.blue} {msg}")
            .expect("BUG: invalid spinner template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message(message);

    let result = task.await;

    spinner.finish_and_clear();

    result
}

/// Bytes of a file accepted by the cache.
///
/// Accepted isn't the same as stored in S3; the last write of the upload takes noticeably longer
/// than the others since it waits for everything still buffered to be flushed.
pub(crate) struct UploadProgress {
    bar: indicatif::ProgressBar,
}

impl UploadProgress {
    /// `offset` is where the upload starts, which is non-zero when resuming
    pub fn new(globals: &super::Globals, id: &str, size: u64, offset: u64) -> Self {
        let bar = if hide_progress(globals) {
            indicatif::ProgressBar::hidden()
        } else {
            indicatif::ProgressBar::new(size)
        };

        bar.set_style(
            indicatif::ProgressStyle::with_template(
                "{spinner:.green} {prefix}: [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
            )
            .expect("BUG: invalid progress template")
            .progress_chars("#>-"),
        );
        bar.set_prefix(id.to_string());
        bar.set_position(offset);
        bar.reset_eta();

        Self { bar }
    }

    pub fn set_position(&self, offset: u64) {
        self.bar.set_position(offset);
    }

    pub fn finish(&self) {
        self.bar.finish();
    }
}

/// Progress should be hidden for either of verbose mode (because there will be a flurry of log
/// messages and the progress bar rendering will be all messed up), or quiet mode (because
/// progress bars are not quiet).
fn hide_progress(globals: &super::Globals) -> bool {
    globals.verbose || globals.quiet
}
