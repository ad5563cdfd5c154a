//! Error types for the aggregation engine.
//!
//! Only total failures are modelled here. Empty extractions, degraded
//! enrichment and correlation misses are ordinary values, see
//! [`crate::ingest::SourceOutcome`] and [`crate::ingest::enrich::DegradeReason`].

use thiserror::Error;

/// Result type alias for aggregation operations
pub type Result<T> = std::result::Result<T, AggregationError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregationError {
    /// Every relay/attempt combination failed for `url` (aggregation unavailable).
    #[error("all {relays} relays exhausted for {url} after {attempts} attempts")]
    RelayExhausted {
        url: String,
        relays: usize,
        attempts: usize,
    },

    /// The relay list is empty, nothing can be fetched.
    #[error("no relays configured")]
    NoRelays,

    /// A listing or detail reference that cannot be turned into an absolute URL.
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The primary pipeline failed and no degraded dataset is configured.
    #[error("feed unavailable from source '{source_id}': {reason}")]
    Unavailable { source_id: String, reason: String },

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),
}

impl AggregationError {
    /// True for the failures that mean "the network path is gone" rather than bad input.
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, Self::RelayExhausted { .. } | Self::NoRelays)
    }
}
