//! Configuration for the sync controller.

use std::path::PathBuf;
use std::time::Duration;

/// Polling interval for accounts with more than one client.
pub const MULTI_DEVICE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Polling interval for single-client accounts.
pub const SINGLE_DEVICE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for [`crate::SyncController`].
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Directory holding the account pickle.
    pub data_dir: PathBuf,
    /// File name of the account pickle inside `data_dir`.
    pub pickle_file_name: String,
    /// Storage API version handed to the session engine.
    pub server_api_version: String,
    /// Interval between syncs when the account has several clients.
    pub multi_device_interval: Duration,
    /// Interval between syncs when the account has at most one client.
    pub single_device_interval: Duration,
    /// Added to the remaining delay reported for a deferred run.
    pub backoff_pad: Duration,
    /// Upper bound of the random fraction added to requested backoffs.
    pub backoff_fuzz: f64,
    /// How often the watchdog sweeps connections.
    pub watchdog_interval: Duration,
    /// Connections idle for longer than this are closed by the watchdog.
    pub idle_connection_timeout: Duration,
    /// Whether passwords and sync keys may appear in debug logs.
    pub log_personal_information: bool,
}

impl ControllerConfig {
    /// Creates a configuration rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            pickle_file_name: "sync.account.json".into(),
            server_api_version: "1.1".into(),
            multi_device_interval: MULTI_DEVICE_INTERVAL,
            single_device_interval: SINGLE_DEVICE_INTERVAL,
            backoff_pad: Duration::from_secs(5),
            backoff_fuzz: 0.25,
            watchdog_interval: Duration::from_secs(5),
            idle_connection_timeout: Duration::from_secs(30),
            log_personal_information: false,
        }
    }

    /// Sets the pickle file name.
    pub fn with_pickle_file_name(mut self, name: impl Into<String>) -> Self {
        self.pickle_file_name = name.into();
        self
    }

    /// Sets the storage API version.
    pub fn with_server_api_version(mut self, version: impl Into<String>) -> Self {
        self.server_api_version = version.into();
        self
    }

    /// Sets both sync intervals.
    pub fn with_sync_intervals(mut self, multi_device: Duration, single_device: Duration) -> Self {
        self.multi_device_interval = multi_device;
        self.single_device_interval = single_device;
        self
    }

    /// Sets the pad added to deferred-run delays.
    pub fn with_backoff_pad(mut self, pad: Duration) -> Self {
        self.backoff_pad = pad;
        self
    }

    /// Sets the backoff fuzz fraction, clamped to `[0, 1]`.
    pub fn with_backoff_fuzz(mut self, fuzz: f64) -> Self {
        self.backoff_fuzz = fuzz.clamp(0.0, 1.0);
        self
    }

    /// Sets the watchdog sweep interval and idle timeout.
    pub fn with_watchdog(mut self, interval: Duration, idle_timeout: Duration) -> Self {
        self.watchdog_interval = interval;
        self.idle_connection_timeout = idle_timeout;
        self
    }

    /// Allows secrets in debug logs.
    pub fn with_personal_information_logging(mut self, enabled: bool) -> Self {
        self.log_personal_information = enabled;
        self
    }

    /// Returns the full path of the account pickle.
    pub fn pickle_path(&self) -> PathBuf {
        self.data_dir.join(&self.pickle_file_name)
    }
}
