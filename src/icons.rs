// =============================================================================
// Coin icons
// =============================================================================
//
// Icon bytes come from an external `IconProvider` and are cached per base
// asset in the Icons container. A coin without an icon is cached as an empty
// byte vector so the provider is not asked again until the entry expires.
//
// Providers are synchronous (file reads); lookups run on the blocking pool.
// =============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{CacheContainer, TtlCache};

/// Source of raw PNG bytes for a coin.
pub trait IconProvider: Send + Sync {
    fn icon_bytes(&self, base_asset: &str) -> Option<Vec<u8>>;
}

/// Reads `<dir>/<asset>.png`, asset lower-cased.
#[derive(Debug, Clone)]
pub struct DirectoryIconProvider {
    dir: PathBuf,
}

impl DirectoryIconProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl IconProvider for DirectoryIconProvider {
    fn icon_bytes(&self, base_asset: &str) -> Option<Vec<u8>> {
        let path = self.dir.join(format!("{}.png", base_asset.to_lowercase()));
        match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "icon not found");
                None
            }
        }
    }
}

/// Cached icon lookup. Returns an empty vector for coins without an icon.
pub struct Icons {
    provider: Arc<dyn IconProvider>,
    cache: Arc<TtlCache>,
}

impl Icons {
    pub fn new(provider: Arc<dyn IconProvider>, cache: Arc<TtlCache>) -> Self {
        Self { provider, cache }
    }

    pub async fn icon(&self, base_asset: &str) -> Arc<Vec<u8>> {
        if let Some(hit) = self.cache.get::<Vec<u8>>(CacheContainer::Icons, base_asset) {
            return hit;
        }

        let provider = Arc::clone(&self.provider);
        let asset = base_asset.to_string();
        let bytes = match tokio::task::spawn_blocking(move || provider.icon_bytes(&asset)).await {
            Ok(bytes) => bytes.unwrap_or_default(),
            Err(e) => {
                warn!(asset = base_asset, error = %e, "icon lookup task failed");
                Vec::new()
            }
        };
        self.cache.put(CacheContainer::Icons, base_asset, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread::ThreadId;

    struct CountingProvider {
        calls: AtomicUsize,
    }

    impl IconProvider for CountingProvider {
        fn icon_bytes(&self, base_asset: &str) -> Option<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (base_asset == "BTC").then(|| vec![0x89, b'P', b'N', b'G'])
        }
    }

    #[tokio::test]
    async fn icons_and_misses_are_cached() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let icons = Icons::new(provider.clone(), Arc::new(TtlCache::new()));

        assert_eq!(icons.icon("BTC").await.len(), 4);
        assert!(icons.icon("NOPE").await.is_empty());
        assert_eq!(icons.icon("BTC").await.len(), 4);
        assert!(icons.icon("NOPE").await.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    struct ThreadRecordingProvider {
        seen: Mutex<Vec<ThreadId>>,
    }

    impl IconProvider for ThreadRecordingProvider {
        fn icon_bytes(&self, _base_asset: &str) -> Option<Vec<u8>> {
            self.seen.lock().push(std::thread::current().id());
            None
        }
    }

    #[tokio::test]
    async fn provider_runs_off_the_runtime_thread() {
        let provider = Arc::new(ThreadRecordingProvider {
            seen: Mutex::new(Vec::new()),
        });
        let icons = Icons::new(provider.clone(), Arc::new(TtlCache::new()));

        assert!(icons.icon("ETH").await.is_empty());

        let seen = provider.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_ne!(seen[0], std::thread::current().id());
    }

    #[test]
    fn directory_provider_reads_lowercase_png() {
        let dir = std::env::temp_dir().join(format!("scanner-icons-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("eth.png"), [1u8, 2, 3]).unwrap();

        let provider = DirectoryIconProvider::new(&dir);
        assert_eq!(provider.icon_bytes("ETH"), Some(vec![1, 2, 3]));
        assert_eq!(provider.icon_bytes("BTC"), None);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
