use std::time::Duration;

/// Ambient tunables used across the scanner, watcher supervisor, and freeze loop.
///
/// `vigil` is a library: it never reads environment variables or config files for
/// these itself (the watcher subprocess's fd-passing env vars are the one exception,
/// documented on [`crate::watcher`]). An embedding application constructs a `Config`
/// and threads it through.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bytes read per chunk during a scan. Also the granularity at which the scan
    /// cancellation flag is polled.
    pub chunk_size: usize,
    /// How often the watch/freeze loop re-reads and re-imposes frozen bytes.
    pub refresh_interval: Duration,
    /// How long the watch session supervisor waits after SIGINT before escalating to
    /// SIGKILL.
    pub watcher_shutdown_grace: Duration,
    /// Number of scan worker threads. `None` means
    /// `std::thread::available_parallelism()`.
    pub worker_count: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            chunk_size: 64 * 1024,
            refresh_interval: Duration::from_millis(250),
            watcher_shutdown_grace: Duration::from_millis(5000),
            worker_count: None,
        }
    }
}

impl Config {
    pub fn worker_count(&self) -> usize {
        self.worker_count.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}
