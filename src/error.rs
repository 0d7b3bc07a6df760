// =============================================================================
// Scanner error taxonomy
// =============================================================================
//
// Upstream unavailability is recovered by the service layer (empty result),
// malformed upstream data is surfaced to the caller, and the quota guard
// rejects oversized candle windows before any request is sent.
// =============================================================================

use thiserror::Error;

pub type ScannerResult<T> = std::result::Result<T, ScannerError>;

#[derive(Debug, Error)]
pub enum ScannerError {
    /// Network/HTTP failure, non-success status, null body, or a request
    /// refused locally by the rate-limit tracker.
    #[error("upstream unavailable ({url}): {reason}")]
    UpstreamUnavailable { url: String, reason: String },

    /// The upstream payload broke its contract (missing field, unparsable
    /// decimal string, unexpected JSON shape).
    #[error("malformed upstream data in {context}: {detail}")]
    MalformedUpstreamData { context: String, detail: String },

    #[error(
        "too much data requested for {symbol} with interval {interval} and period {period}: {points} points"
    )]
    QuotaGuardExceeded {
        symbol: String,
        interval: String,
        period: String,
        points: i64,
    },

    #[error("invalid interval '{0}'")]
    InvalidInterval(String),

    #[error("invalid period '{0}'")]
    InvalidPeriod(String),
}

impl ScannerError {
    pub fn upstream(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::UpstreamUnavailable {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed(context: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self::MalformedUpstreamData {
            context: context.into(),
            detail: detail.to_string(),
        }
    }

    /// `true` for failures the service layer turns into "no data now".
    pub fn is_upstream_unavailable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_guard_message_names_the_request() {
        let err = ScannerError::QuotaGuardExceeded {
            symbol: "BTCUSDT".into(),
            interval: "1h".into(),
            period: "3M".into(),
            points: 2208,
        };
        let msg = err.to_string();
        assert!(msg.contains("too much data requested"));
        assert!(msg.contains("BTCUSDT"));
        assert!(msg.contains("3M"));
    }

    #[test]
    fn only_upstream_failures_are_recoverable() {
        assert!(ScannerError::upstream("http://x", "timeout").is_upstream_unavailable());
        assert!(!ScannerError::malformed("ticker", "bad").is_upstream_unavailable());
        assert!(!ScannerError::InvalidPeriod("30d".into()).is_upstream_unavailable());
    }
}
