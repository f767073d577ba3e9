//! Connection watchdog.
//!
//! While a run is in flight a watchdog thread periodically asks the
//! connection pool to close expired and idle connections. It is stopped and
//! joined by the controller before a run result is returned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Closes stale network connections.
pub trait ConnectionReaper: Send + Sync {
    /// Closes connections whose keep-alive has expired.
    fn close_expired(&self);

    /// Closes connections idle for longer than `idle`.
    fn close_idle(&self, idle: Duration);
}

/// A reaper for hosts without a connection pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReaper;

impl ConnectionReaper for NoopReaper {
    fn close_expired(&self) {}

    fn close_idle(&self, _idle: Duration) {}
}

/// Summary of a watchdog's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchdogReport {
    /// Number of sweeps performed.
    pub sweeps: u64,
    /// Whether a cancellation request was observed.
    pub saw_cancel: bool,
}

/// A running watchdog thread.
#[derive(Debug)]
pub struct Watchdog {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<WatchdogReport>>,
}

impl Watchdog {
    /// Starts a watchdog that sweeps every `interval`.
    ///
    /// `cancel` is polled on each sweep so that a cancellation request is
    /// logged while the run continues.
    pub fn start(
        reaper: Arc<dyn ConnectionReaper>,
        interval: Duration,
        idle: Duration,
        cancel: Arc<AtomicBool>,
    ) -> std::io::Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("connection-watchdog".into())
            .spawn(move || {
                let mut report = WatchdogReport::default();
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            reaper.close_expired();
                            reaper.close_idle(idle);
                            report.sweeps += 1;
                            if !report.saw_cancel && cancel.load(Ordering::Acquire) {
                                report.saw_cancel = true;
                                tracing::info!(
                                    "sync cancellation requested; run continues to completion"
                                );
                            }
                            tracing::trace!(sweeps = report.sweeps, "watchdog sweep");
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                report
            })?;

        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Stops the watchdog and waits for its thread to exit.
    pub fn shutdown(mut self) -> WatchdogReport {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> WatchdogReport {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(report)) => report,
            Some(Err(_)) => {
                tracing::warn!("watchdog thread panicked");
                WatchdogReport::default()
            }
            None => WatchdogReport::default(),
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[derive(Default)]
    struct CountingReaper {
        expired: AtomicU64,
        idle: AtomicU64,
    }

    impl ConnectionReaper for CountingReaper {
        fn close_expired(&self) {
            self.expired.fetch_add(1, Ordering::SeqCst);
        }

        fn close_idle(&self, _idle: Duration) {
            self.idle.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn sweeps_until_shutdown() {
        let reaper = Arc::new(CountingReaper::default());
        let watchdog = Watchdog::start(
            reaper.clone(),
            Duration::from_millis(5),
            Duration::from_secs(30),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(60));
        let report = watchdog.shutdown();
        assert!(report.sweeps > 0);
        assert_eq!(reaper.expired.load(Ordering::SeqCst), report.sweeps);
        assert_eq!(reaper.idle.load(Ordering::SeqCst), report.sweeps);

        let after = reaper.expired.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(reaper.expired.load(Ordering::SeqCst), after);
    }

    #[test]
    fn shutdown_is_prompt_with_long_interval() {
        let watchdog = Watchdog::start(
            Arc::new(NoopReaper),
            Duration::from_secs(3600),
            Duration::from_secs(30),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();
        let report = watchdog.shutdown();
        assert_eq!(report.sweeps, 0);
    }

    #[test]
    fn observes_cancel() {
        let cancel = Arc::new(AtomicBool::new(true));
        let watchdog = Watchdog::start(
            Arc::new(NoopReaper),
            Duration::from_millis(1),
            Duration::from_secs(1),
            cancel,
        )
        .unwrap();
        thread::sleep(Duration::from_millis(30));
        assert!(watchdog.shutdown().saw_cancel);
    }
}
