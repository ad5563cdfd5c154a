// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod error;
pub mod ingest;
pub mod metrics;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, service, AppState};
pub use crate::error::{AggregationError, Result};
pub use crate::ingest::config::{load_config_default, load_config_from, FeedConfig};
pub use crate::ingest::types::{EnrichedFixture, Fixture, RawFixture};
pub use crate::ingest::Aggregator;
