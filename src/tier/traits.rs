use async_trait::async_trait;
use thiserror::Error;

/// Identity of a tier in the fallback chain, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierName {
    /// Live transit API
    Primary,
    /// Replicated document store
    Secondary,
    /// Local bounded TTL cache
    Cache,
}

impl TierName {
    /// Whether a success from this tier means the network path is up.
    /// A cache hit says nothing about connectivity.
    #[must_use]
    pub fn is_remote(self) -> bool {
        matches!(self, Self::Primary | Self::Secondary)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Cache => "cache",
        }
    }
}

impl std::fmt::Display for TierName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single tier's fetch failure. Non-fatal: the chain falls through to
/// the next tier.
#[derive(Error, Debug, Clone)]
pub enum TierError {
    #[error("not found")]
    NotFound,
    #[error("timed out")]
    Timeout,
    #[error("tier unavailable: {0}")]
    Unavailable(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// One entry in the per-tier error list carried by [`ChainExhausted`].
#[derive(Debug, Clone)]
pub struct TierFailure {
    pub tier: TierName,
    pub error: String,
}

/// Terminal error: every tier failed for the key. Carries the per-tier
/// errors for diagnostics.
#[derive(Error, Debug, Clone)]
#[error("all tiers failed for '{key}'")]
pub struct ChainExhausted {
    pub key: String,
    pub failures: Vec<TierFailure>,
}

impl ChainExhausted {
    /// Render the per-tier errors as a single diagnostic line.
    #[must_use]
    pub fn summary(&self) -> String {
        self.failures
            .iter()
            .map(|f| format!("{}: {}", f.tier, f.error))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// One data source in the fallback chain.
///
/// A tier owns its internal timeout/retry policy; the chain only sees
/// success or failure. Tiers share no mutable state with each other.
#[async_trait]
pub trait DataTier<T>: Send + Sync {
    fn name(&self) -> TierName;
    async fn fetch(&self, key: &str) -> Result<T, TierError>;
}
