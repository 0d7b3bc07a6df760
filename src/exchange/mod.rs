// =============================================================================
// Exchange access: HTTP capability, per-exchange profile, symbol resolution
// =============================================================================

pub mod client;
pub mod profile;
pub mod rate_limit;
pub mod symbol_resolver;

pub use client::ReqwestFetcher;
pub use profile::{ExchangeProfile, LeverageRules};
pub use rate_limit::RateLimitTracker;
pub use symbol_resolver::{resolve_quote, SymbolResolver};

use async_trait::async_trait;

use crate::error::ScannerResult;

/// The only way the core talks to upstream REST endpoints: GET a URL with
/// query parameters and return the decoded JSON body.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn get_json(&self, url: &str, params: &[(&str, String)]) -> ScannerResult<serde_json::Value>;
}
