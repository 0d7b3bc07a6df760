// =============================================================================
// In-memory caching: TTL containers and bounded background refresh
// =============================================================================

pub mod refresh_scheduler;
pub mod ttl_cache;

pub use refresh_scheduler::{RefreshScheduler, RefreshSettings};
pub use ttl_cache::{CacheContainer, CachePolicy, TtlCache};
