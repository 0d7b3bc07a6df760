use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

// ---------------------------------------------------------------------------
// Containers and policies
// ---------------------------------------------------------------------------

/// Named cache regions, each with its own expiry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheContainer {
    AllTickers,
    Candles,
    ExchangeInfo,
    Icons,
    MarketCap,
}

impl CacheContainer {
    pub const ALL: [CacheContainer; 5] = [
        Self::AllTickers,
        Self::Candles,
        Self::ExchangeInfo,
        Self::Icons,
        Self::MarketCap,
    ];

    pub fn default_policy(self) -> CachePolicy {
        const MINUTE: u64 = 60;
        let (ttl_secs, max_entries) = match self {
            Self::AllTickers => (15 * MINUTE, 5),
            Self::Candles => (5 * MINUTE, 1000),
            Self::ExchangeInfo => (1441 * MINUTE, 5),
            Self::Icons => (5 * 24 * 60 * MINUTE, 1000),
            Self::MarketCap => (120 * MINUTE, 5),
        };
        CachePolicy {
            ttl: Duration::from_secs(ttl_secs),
            max_entries,
        }
    }
}

/// Expiry rule applied to every entry in a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub max_entries: usize,
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

struct CacheEntry {
    key: String,
    value: Arc<dyn Any + Send + Sync>,
    inserted_at: Instant,
    /// Insertion order, breaks ties between equal `inserted_at`.
    seq: u64,
}

impl CacheEntry {
    fn is_expired(&self, policy: &CachePolicy, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= policy.ttl
    }
}

type FlightKey = (CacheContainer, String);

// ---------------------------------------------------------------------------
// TtlCache
// ---------------------------------------------------------------------------

/// In-memory, type-erased cache with per-container TTL and size bounds.
///
/// Values are stored as `Arc<T>`; readers get a cheap clone of the `Arc` and
/// never hold the cache lock while using the value. A miss on one key never
/// waits on work for another key.
pub struct TtlCache {
    entries: Mutex<HashMap<CacheContainer, HashMap<String, CacheEntry>>>,
    policies: HashMap<CacheContainer, CachePolicy>,
    in_flight: Mutex<HashMap<FlightKey, Arc<tokio::sync::Mutex<()>>>>,
    next_seq: Mutex<u64>,
}

impl TtlCache {
    pub fn new() -> Self {
        Self::with_policies(HashMap::new())
    }

    /// Default policies, with `overrides` replacing individual containers.
    pub fn with_policies(overrides: HashMap<CacheContainer, CachePolicy>) -> Self {
        let policies = CacheContainer::ALL
            .iter()
            .map(|&c| (c, overrides.get(&c).copied().unwrap_or_else(|| c.default_policy())))
            .collect();
        Self {
            entries: Mutex::new(HashMap::new()),
            policies,
            in_flight: Mutex::new(HashMap::new()),
            next_seq: Mutex::new(0),
        }
    }

    pub fn policy(&self, container: CacheContainer) -> CachePolicy {
        self.policies
            .get(&container)
            .copied()
            .unwrap_or_else(|| container.default_policy())
    }

    /// Look up a live entry. Expired entries are dropped and read as a miss,
    /// as does an entry holding a value of another type.
    pub fn get<T>(&self, container: CacheContainer, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let policy = self.policy(container);
        let mut entries = self.entries.lock();
        let region = entries.get_mut(&container)?;

        let entry = region.get(key)?;
        if entry.is_expired(&policy, Instant::now()) {
            region.remove(key);
            debug!(?container, key, "cache entry expired");
            return None;
        }
        Arc::clone(&entry.value).downcast::<T>().ok()
    }

    /// Insert or replace an entry. A full container loses its oldest entry.
    pub fn put<T>(&self, container: CacheContainer, key: &str, value: T) -> Arc<T>
    where
        T: Any + Send + Sync,
    {
        let value = Arc::new(value);
        let erased: Arc<dyn Any + Send + Sync> = value.clone();
        self.put_arc(container, key, erased);
        value
    }

    fn put_arc(&self, container: CacheContainer, key: &str, value: Arc<dyn Any + Send + Sync>) {
        let policy = self.policy(container);
        let now = Instant::now();
        let seq = {
            let mut next = self.next_seq.lock();
            *next += 1;
            *next
        };

        let mut entries = self.entries.lock();
        let region = entries.entry(container).or_default();
        region.retain(|_, e| !e.is_expired(&policy, now));

        if !region.contains_key(key) {
            while region.len() >= policy.max_entries.max(1) {
                let Some(oldest) = region
                    .values()
                    .min_by_key(|e| (e.inserted_at, e.seq))
                    .map(|e| e.key.clone())
                else {
                    break;
                };
                region.remove(&oldest);
                debug!(?container, key = %oldest, "cache full, evicted oldest entry");
            }
        }

        region.insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                value,
                inserted_at: now,
                seq,
            },
        );
    }

    pub fn evict(&self, container: CacheContainer, key: &str) -> bool {
        let removed = self
            .entries
            .lock()
            .get_mut(&container)
            .and_then(|region| region.remove(key))
            .is_some();
        if removed {
            debug!(?container, key, "cache entry evicted");
        }
        removed
    }

    /// Number of stored entries in a container, expired ones included until
    /// they are next touched.
    pub fn len(&self, container: CacheContainer) -> usize {
        self.entries.lock().get(&container).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self, container: CacheContainer) -> bool {
        self.len(container) == 0
    }

    /// Cache-aside read. On a miss the supplier runs and a successful result
    /// is stored; a failed one is returned and nothing is cached.
    ///
    /// Concurrent misses on the same key are collapsed: one caller runs the
    /// supplier, the others wait for it and then read its result.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        container: CacheContainer,
        key: &str,
        supplier: F,
    ) -> Result<Arc<T>, E>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get::<T>(container, key) {
            return Ok(hit);
        }

        let flight_key = (container, key.to_string());
        let flight = Arc::clone(
            self.in_flight
                .lock()
                .entry(flight_key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        );

        let result = {
            let _turn = flight.lock().await;
            match self.get::<T>(container, key) {
                Some(hit) => Ok(hit),
                None => {
                    debug!(?container, key, "cache miss, computing");
                    supplier().await.map(|value| self.put(container, key, value))
                }
            }
        };

        let mut in_flight = self.in_flight.lock();
        // Only the map and this caller still hold the lock: nobody is waiting.
        if Arc::strong_count(&flight) == 2 {
            in_flight.remove(&flight_key);
        }
        result
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new()
    }
}
