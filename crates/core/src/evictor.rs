//! Background sweep of expired entries.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::cache::CacheInner;
use crate::{Error, Result};

#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Dedicated thread that calls `remove_expired` on a fixed interval.
///
/// Sweeps once immediately, then every `interval`. A failed sweep is logged
/// and the next one runs on schedule. Dropping the evictor stops the thread
/// and waits for an in-flight sweep to finish.
#[derive(Debug)]
pub(crate) struct Evictor {
    handle: Option<JoinHandle<()>>,
    signal: Arc<StopSignal>,
}

impl Evictor {
    pub(crate) fn spawn(cache: Arc<CacheInner>, interval: Duration) -> Result<Self> {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);

        let handle = thread::Builder::new()
            .name("litecache-evictor".to_string())
            .spawn(move || run(&cache, &thread_signal, interval))
            .map_err(|e| Error::TaskFailed(format!("failed to start evictor thread: {e}")))?;

        tracing::debug!(interval_ms = interval.as_millis() as u64, "started background evictor");
        Ok(Self { handle: Some(handle), signal })
    }

    /// Stop the thread and wait for it to exit.
    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        *self.signal.stopped.lock() = true;
        self.signal.wake.notify_all();

        if handle.join().is_err() {
            tracing::error!("background evictor thread panicked");
        } else {
            tracing::debug!("stopped background evictor");
        }
    }
}

impl Drop for Evictor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(cache: &CacheInner, signal: &StopSignal, interval: Duration) {
    loop {
        if let Err(e) = cache.remove_expired() {
            tracing::warn!(error = %e, "background eviction failed");
        }

        let deadline = Instant::now() + interval;
        let mut stopped = signal.stopped.lock();
        while !*stopped {
            if signal.wake.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        if *stopped {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::cache::SqliteCache;
    use crate::config::CacheConfig;
    use crate::expiry::EntryOptions;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::{Duration, Instant};

    fn expired() -> EntryOptions {
        EntryOptions::new().absolute_expiration(Utc::now() - ChronoDuration::hours(1))
    }

    #[test]
    fn test_sweeps_without_caller() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::at_path(dir.path().join("evict.db")).with_cleanup_interval(Duration::from_millis(20));
        let cache = SqliteCache::open(config).unwrap();
        assert!(cache.has_evictor());

        cache.set("stale", b"v", &expired()).unwrap();
        cache.set("fresh", b"v", &EntryOptions::new()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while cache.info().unwrap().entries > 1 {
            assert!(Instant::now() < deadline, "evictor never removed the expired row");
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(cache.get("fresh").unwrap().is_some());
    }

    #[test]
    fn test_keeps_sweeping_after_failures() {
        let config = CacheConfig { busy_timeout_ms: 100, ..CacheConfig::in_memory() }
            .with_cleanup_interval(Duration::from_millis(20));
        let cache = SqliteCache::open(config).unwrap();

        // the only connection is held, so sweeps time out in the meantime
        let session = cache.session().unwrap();
        std::thread::sleep(Duration::from_millis(350));
        session.set("stale", b"v", &expired()).unwrap();
        session.commit().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if cache.info().is_ok_and(|info| info.entries == 0) {
                break;
            }
            assert!(Instant::now() < deadline, "evictor stopped after failed sweeps");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_disabled_by_default() {
        let cache = SqliteCache::open_in_memory().unwrap();
        assert!(!cache.has_evictor());
        cache.set("stale", b"v", &expired()).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.info().unwrap().entries, 1);
    }

    #[test]
    fn test_close_stops_promptly_with_long_interval() {
        let config = CacheConfig::in_memory().with_cleanup_interval(Duration::from_secs(3600));
        let cache = SqliteCache::open(config).unwrap();

        let started = Instant::now();
        cache.close();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
