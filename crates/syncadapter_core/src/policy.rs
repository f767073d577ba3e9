//! Backoff gating and sync interval selection.

use crate::backoff::BackoffStore;
use crate::clock::{millis, Clock};
use crate::config::ControllerConfig;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Decides whether a run may start and how far to push the next one.
///
/// Persistence failures in the underlying store are logged and otherwise
/// ignored: a lost backoff write must never fail a sync run.
pub struct BackoffPolicy {
    store: Arc<dyn BackoffStore>,
    clock: Arc<dyn Clock>,
    fuzz: f64,
    multi_device_interval: Duration,
    single_device_interval: Duration,
}

impl BackoffPolicy {
    /// Creates a policy over `store` using the intervals and fuzz in `config`.
    pub fn new(
        store: Arc<dyn BackoffStore>,
        clock: Arc<dyn Clock>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            store,
            clock,
            fuzz: config.backoff_fuzz,
            multi_device_interval: config.multi_device_interval,
            single_device_interval: config.single_device_interval,
        }
    }

    /// Milliseconds until the backoff window closes, or 0.
    pub fn delay_millis(&self) -> i64 {
        let earliest = self.store.earliest_next_sync();
        if earliest <= 0 {
            return 0;
        }
        (earliest - self.clock.now_millis()).max(0)
    }

    /// Returns true if a run should be deferred.
    ///
    /// Forced runs and runs that need a fresh node assignment are never
    /// deferred.
    pub fn should_back_off(&self, forced: bool) -> bool {
        !forced && !self.want_node_assignment() && self.delay_millis() > 0
    }

    /// Pushes the backoff window to at least `now + fuzzed(duration_ms)`.
    ///
    /// Non-positive durations are ignored. The window is never shortened.
    pub fn request_backoff(&self, duration_ms: i64) {
        if duration_ms <= 0 {
            return;
        }
        let fuzzed = self.fuzzed(duration_ms);
        let until = self.clock.now_millis().saturating_add(fuzzed);
        tracing::info!(duration_ms, fuzzed_ms = fuzzed, until, "backoff requested");
        self.extend_to(until);
    }

    /// Adds up to `fuzz * duration_ms` of random jitter.
    pub fn fuzzed(&self, duration_ms: i64) -> i64 {
        fuzz_duration(duration_ms, self.fuzz, rand::thread_rng().gen::<f64>())
    }

    /// Extends the earliest next sync to `until`, logging store failures.
    pub fn extend_to(&self, until: i64) {
        match self.store.extend_earliest_next_sync(until) {
            Ok(true) => tracing::debug!(until, "extended earliest next sync"),
            Ok(false) => tracing::trace!(until, "earliest next sync already later"),
            Err(e) => tracing::warn!(error = %e, until, "failed to persist earliest next sync"),
        }
    }

    /// Extends the earliest next sync to `now + interval`.
    pub fn extend_by(&self, interval: Duration) {
        let until = self.clock.now_millis().saturating_add(millis(interval));
        self.extend_to(until);
    }

    /// Returns true if the client must re-resolve its node.
    pub fn want_node_assignment(&self) -> bool {
        self.store.cluster_url_is_stale()
    }

    /// Marks the cluster URL as stale.
    pub fn mark_node_stale(&self) {
        self.set_stale(true);
    }

    /// Clears the stale flag.
    pub fn clear_node_stale(&self) {
        self.set_stale(false);
    }

    fn set_stale(&self, stale: bool) {
        if let Err(e) = self.store.set_cluster_url_is_stale(stale) {
            tracing::warn!(error = %e, stale, "failed to persist cluster URL staleness");
        }
    }

    /// Picks the interval until the next sync.
    ///
    /// `clients` is the number of clients on the account, or `None` when the
    /// account could not be resolved.
    pub fn sync_interval(&self, clients: Option<u32>) -> Duration {
        match clients {
            Some(count) if count > 1 => self.multi_device_interval,
            _ => self.single_device_interval,
        }
    }
}

impl std::fmt::Debug for BackoffPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackoffPolicy")
            .field("state", &self.store.snapshot())
            .field("fuzz", &self.fuzz)
            .field("multi_device_interval", &self.multi_device_interval)
            .field("single_device_interval", &self.single_device_interval)
            .finish()
    }
}

/// Computes `d + floor(d * fuzz * sample)` for `sample` in `[0, 1)`.
///
/// The result always lies in `[d, d + d * fuzz]`.
pub fn fuzz_duration(duration_ms: i64, fuzz: f64, sample: f64) -> i64 {
    if duration_ms <= 0 {
        return duration_ms;
    }
    let fraction = (fuzz * sample).clamp(0.0, 1.0);
    let max_jitter = (duration_ms as f64 * fuzz.clamp(0.0, 1.0)).floor();
    let jitter = (duration_ms as f64 * fraction).floor().min(max_jitter);
    duration_ms.saturating_add(jitter as i64)
}
