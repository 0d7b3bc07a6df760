// =============================================================================
// Refresh Scheduler: keeps one hot cache entry warm for a bounded window
// =============================================================================
//
// Lifecycle:  Idle --activate--> Active --(max_iterations | deactivate)--> Idle
//
// While active a background task ticks every `interval`. Each tick increments
// the iteration counter; on reaching `max_iterations` the task evicts the key,
// resets the counter and ends, putting the cache back in its cold state.
// Every other tick recomputes the value and swaps it in with `put` only once
// the computation has succeeded, so readers never observe a gap. A failed
// refresh is logged and the task keeps ticking.
// =============================================================================

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::ttl_cache::{CacheContainer, TtlCache};
use crate::error::ScannerResult;

fn default_interval_secs() -> u64 {
    151
}

fn default_max_iterations() -> u32 {
    6
}

/// Tick cadence and self-termination cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSettings {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_iterations: default_max_iterations(),
        }
    }
}

impl RefreshSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

struct Inner {
    label: String,
    container: CacheContainer,
    key: String,
    settings: RefreshSettings,
    cache: Arc<TtlCache>,
    iterations: AtomicU32,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn finish(&self) {
        self.cache.evict(self.container, &self.key);
        self.iterations.store(0, Ordering::SeqCst);
    }
}

/// Periodic refresher for one `(container, key)`, owned by the service of
/// one exchange. At most one task is live per instance.
pub struct RefreshScheduler<T> {
    inner: Arc<Inner>,
    _value: std::marker::PhantomData<fn() -> T>,
}

impl<T> RefreshScheduler<T>
where
    T: Send + Sync + 'static,
{
    pub fn new(
        label: impl Into<String>,
        cache: Arc<TtlCache>,
        container: CacheContainer,
        key: impl Into<String>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                label: label.into(),
                container,
                key: key.into(),
                settings,
                cache,
                iterations: AtomicU32::new(0),
                handle: Mutex::new(None),
            }),
            _value: std::marker::PhantomData,
        }
    }

    /// Start ticking. Returns `false`, and does nothing, when a task is
    /// already live.
    pub fn activate<F, Fut>(&self, refresh: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ScannerResult<T>> + Send + 'static,
    {
        let mut handle = self.inner.handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!(scheduler = %self.inner.label, "refresh already active");
            return false;
        }

        self.inner.iterations.store(0, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let period = inner.settings.interval();

        *handle = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !tick(&inner, &refresh).await {
                    break;
                }
            }
        }));

        info!(
            scheduler = %self.inner.label,
            key = %self.inner.key,
            interval_secs = period.as_secs(),
            max_iterations = self.inner.settings.max_iterations,
            "refresh activated"
        );
        true
    }

    /// Stop the task, evict the key and reset the counter.
    pub fn deactivate(&self) {
        if let Some(handle) = self.inner.handle.lock().take() {
            handle.abort();
            info!(scheduler = %self.inner.label, "refresh deactivated");
        }
        self.inner.finish();
    }

    pub fn is_active(&self) -> bool {
        self.inner
            .handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn iterations(&self) -> u32 {
        self.inner.iterations.load(Ordering::SeqCst)
    }
}

impl<T> Drop for RefreshScheduler<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.inner.handle.lock().take() {
            handle.abort();
        }
    }
}

/// One scheduler tick. Returns `false` once the task should end.
async fn tick<T, F, Fut>(inner: &Inner, refresh: &F) -> bool
where
    T: Send + Sync + 'static,
    F: Fn() -> Fut,
    Fut: Future<Output = ScannerResult<T>>,
{
    let iteration = inner.iterations.fetch_add(1, Ordering::SeqCst) + 1;

    if iteration >= inner.settings.max_iterations {
        // Clear the handle before the key goes, so a request that repopulates
        // the entry can activate a fresh task.
        {
            let mut handle = inner.handle.lock();
            handle.take();
            inner.finish();
        }
        info!(
            scheduler = %inner.label,
            key = %inner.key,
            iterations = iteration,
            "refresh window elapsed, entry evicted"
        );
        return false;
    }

    match refresh().await {
        Ok(value) => {
            inner.cache.put(inner.container, &inner.key, value);
            debug!(scheduler = %inner.label, iteration, "cache entry refreshed");
        }
        Err(e) => {
            warn!(scheduler = %inner.label, iteration, error = %e, "refresh failed, keeping previous value");
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScannerError;
    use std::sync::atomic::AtomicUsize;

    const KEY: &str = "binance-ALL_TICKERS";

    fn scheduler(cache: &Arc<TtlCache>) -> RefreshScheduler<Vec<u32>> {
        RefreshScheduler::new(
            "binance",
            Arc::clone(cache),
            CacheContainer::AllTickers,
            KEY,
            RefreshSettings::default(),
        )
    }

    fn counting_refresh(
        calls: &Arc<AtomicUsize>,
    ) -> impl Fn() -> futures_util::future::Ready<ScannerResult<Vec<u32>>> + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            futures_util::future::ready(Ok(vec![n as u32]))
        }
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[tokio::test(start_paused = true)]
    async fn second_activation_is_a_no_op() {
        let cache = Arc::new(TtlCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let s = scheduler(&cache);

        assert!(s.activate(counting_refresh(&calls)));
        assert!(!s.activate(counting_refresh(&calls)));
        assert!(s.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_fires_after_one_interval() {
        let cache = Arc::new(TtlCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let s = scheduler(&cache);
        s.activate(counting_refresh(&calls));

        tokio::time::sleep(secs(150)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(s.iterations(), 1);
        assert_eq!(*cache.get::<Vec<u32>>(CacheContainer::AllTickers, KEY).unwrap(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn terminates_and_evicts_after_max_iterations() {
        let cache = Arc::new(TtlCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let s = scheduler(&cache);
        cache.put(CacheContainer::AllTickers, KEY, vec![0u32]);
        s.activate(counting_refresh(&calls));

        // Five refreshing ticks.
        tokio::time::sleep(secs(151 * 5 + 1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(s.iterations(), 5);
        assert!(s.is_active());
        assert_eq!(*cache.get::<Vec<u32>>(CacheContainer::AllTickers, KEY).unwrap(), vec![5]);

        // The sixth tick ends the window.
        tokio::time::sleep(secs(151)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(s.iterations(), 0);
        assert!(!s.is_active());
        assert!(cache.get::<Vec<u32>>(CacheContainer::AllTickers, KEY).is_none());

        // No further ticks once terminated.
        tokio::time::sleep(secs(151 * 3)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        // A new cold population may start it again.
        assert!(s.activate(counting_refresh(&calls)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn evicted_key_never_belongs_to_a_live_task() {
        let cache = Arc::new(TtlCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let s = RefreshScheduler::<Vec<u32>>::new(
            "binance",
            Arc::clone(&cache),
            CacheContainer::AllTickers,
            KEY,
            RefreshSettings {
                interval_secs: 1,
                max_iterations: 1,
            },
        );
        cache.put(CacheContainer::AllTickers, KEY, vec![0u32]);
        assert!(s.activate(counting_refresh(&calls)));

        let watch = async {
            while cache.get::<Vec<u32>>(CacheContainer::AllTickers, KEY).is_some() {
                tokio::task::yield_now().await;
            }
            // Whoever repopulates the key now must be able to restart refresh.
            assert!(!s.is_active());
        };
        tokio::time::timeout(secs(5), watch).await.unwrap();

        assert!(s.activate(counting_refresh(&calls)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_previous_value_and_keeps_ticking() {
        let cache = Arc::new(TtlCache::new());
        let s = scheduler(&cache);
        cache.put(CacheContainer::AllTickers, KEY, vec![7u32]);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        s.activate(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 1 {
                    Err(ScannerError::upstream("http://x/ticker/24hr", "timeout"))
                } else {
                    Ok(vec![n as u32])
                }
            }
        });

        tokio::time::sleep(secs(152)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*cache.get::<Vec<u32>>(CacheContainer::AllTickers, KEY).unwrap(), vec![7]);

        tokio::time::sleep(secs(151)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(*cache.get::<Vec<u32>>(CacheContainer::AllTickers, KEY).unwrap(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn deactivate_aborts_and_evicts() {
        let cache = Arc::new(TtlCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let s = scheduler(&cache);
        s.activate(counting_refresh(&calls));

        tokio::time::sleep(secs(152)).await;
        assert!(cache.get::<Vec<u32>>(CacheContainer::AllTickers, KEY).is_some());

        s.deactivate();
        assert!(!s.is_active());
        assert_eq!(s.iterations(), 0);
        assert!(cache.get::<Vec<u32>>(CacheContainer::AllTickers, KEY).is_none());

        tokio::time::sleep(secs(151 * 2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(s.activate(counting_refresh(&calls)));
    }
}
