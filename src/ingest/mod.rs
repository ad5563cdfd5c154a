// src/ingest/mod.rs
//! Feed aggregation: per-source pipelines (listing fetch, extraction, enrichment)
//! joined by the correlator, with a degraded dataset behind the primary source.

pub mod config;
pub mod correlate;
pub mod enrich;
pub mod extract;
pub mod fallback;
pub mod matcher;
pub mod relay;
pub mod types;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use tracing::{info, warn};
use url::Url;

use crate::error::{AggregationError, Result};
use crate::ingest::config::{FeedConfig, SourceConfig};
use crate::ingest::correlate::FeedCorrelator;
use crate::ingest::enrich::{DetailEnricher, LogoMemo};
use crate::ingest::extract::ScheduleExtractor;
use crate::ingest::fallback::{fallback_fixtures, FallbackEntry};
use crate::ingest::relay::{FetchPolicy, RelayFetchClient, Transport};
use crate::ingest::types::{EnrichedFixture, Fixture, SourceId};

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("relay_attempts_total", "Relay fetch attempts issued.");
        describe_counter!(
            "relay_attempt_failures_total",
            "Relay attempts that timed out, errored or returned non-2xx."
        );
        describe_counter!(
            "relay_exhausted_total",
            "Fetches where every relay/attempt combination failed."
        );
        describe_counter!(
            "extract_fixtures_total",
            "Raw fixtures extracted from listing pages."
        );
        describe_counter!(
            "enrich_degraded_total",
            "Fixtures that kept placeholder artwork or listing time."
        );
        describe_counter!(
            "feed_supplement_matches_total",
            "Primary fixtures paired with a supplement entry."
        );
        describe_counter!(
            "feed_fallback_total",
            "Runs that served the degraded fallback dataset."
        );
        describe_histogram!("feed_run_ms", "Aggregation run time in milliseconds.");
        describe_gauge!("feed_last_run_ts", "Unix ts when the feed was last aggregated.");
    });
}

/// Result of running one source pipeline.
#[derive(Debug)]
pub enum SourceOutcome {
    Fetched(Vec<EnrichedFixture>),
    /// Listing fetched but nothing recognisable on it.
    Empty,
    /// Listing could not be fetched.
    Unavailable(AggregationError),
}

impl SourceOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Fetched(_) => "fetched",
            Self::Empty => "empty",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

/// Listing fetch → extraction → enrichment for one source.
pub struct SourcePipeline {
    id: SourceId,
    listing_url: Url,
    client: Arc<RelayFetchClient>,
    listing_policy: FetchPolicy,
    extractor: ScheduleExtractor,
    enricher: DetailEnricher,
}

impl SourcePipeline {
    pub fn from_config(
        src: &SourceConfig,
        feed: &FeedConfig,
        client: Arc<RelayFetchClient>,
    ) -> Result<Self> {
        let listing_url =
            Url::parse(&src.listing_url).map_err(|e| AggregationError::InvalidUrl {
                url: src.listing_url.clone(),
                reason: e.to_string(),
            })?;
        let extractor = ScheduleExtractor::from_names(&src.strategies)?;
        let enricher = DetailEnricher::new(
            client.clone(),
            feed.detail_policy(),
            feed.detail_concurrency_limit,
            src.id.clone(),
            listing_url.clone(),
        )
        .with_placeholder_base(feed.placeholder_logo_base.clone())
        .with_detail_fetch(src.enrich);

        Ok(Self {
            id: src.id.clone(),
            listing_url,
            client,
            listing_policy: feed.listing_policy(),
            extractor,
            enricher,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn listing_url(&self) -> &Url {
        &self.listing_url
    }

    pub async fn run(&self, memo: &mut LogoMemo) -> SourceOutcome {
        let html = match self
            .client
            .fetch(self.listing_url.as_str(), &self.listing_policy)
            .await
        {
            Ok(body) => body,
            Err(e) => {
                warn!(source = %self.id, url = %self.listing_url, error = %e, "listing unavailable");
                return SourceOutcome::Unavailable(e);
            }
        };

        let raw = self.extractor.extract(&html);
        counter!("extract_fixtures_total").increment(raw.len() as u64);
        if raw.is_empty() {
            info!(source = %self.id, strategies = ?self.extractor.strategy_names(), "no fixtures extracted");
            return SourceOutcome::Empty;
        }
        info!(source = %self.id, count = raw.len(), "fixtures extracted");

        SourceOutcome::Fetched(self.enricher.enrich(raw, memo).await)
    }
}

/// Entry point: one stateless aggregation run per call.
pub struct Aggregator {
    primary: SourcePipeline,
    supplement: SourcePipeline,
    correlator: FeedCorrelator,
    fallback: Vec<FallbackEntry>,
    placeholder_base: String,
}

impl Aggregator {
    pub fn from_config(cfg: &FeedConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        cfg.validate()?;
        ensure_metrics_described();

        let client = Arc::new(RelayFetchClient::from_templates(transport, &cfg.relays));
        let primary = SourcePipeline::from_config(&cfg.primary, cfg, client.clone())?;
        let supplement = SourcePipeline::from_config(&cfg.supplement, cfg, client)?;
        let correlator = FeedCorrelator::new(cfg.matcher.build());

        info!(
            relays = cfg.relays.len(),
            primary = primary.id(),
            supplement = supplement.id(),
            matcher = correlator.matcher_name(),
            fallback = cfg.fallback.len(),
            "aggregator ready"
        );

        Ok(Self {
            primary,
            supplement,
            correlator,
            fallback: cfg.fallback.clone(),
            placeholder_base: cfg.placeholder_logo_base.clone(),
        })
    }

    /// Run both pipelines concurrently and correlate them.
    ///
    /// Errors only when the primary listing is unreachable and there is no
    /// fallback dataset; every other failure degrades the output instead.
    pub async fn get_aggregated_feed(&self) -> Result<Vec<Fixture>> {
        let started = Instant::now();

        let mut primary_memo = LogoMemo::new();
        let mut supplement_memo = LogoMemo::new();
        let (a, b) = tokio::join!(
            self.primary.run(&mut primary_memo),
            self.supplement.run(&mut supplement_memo)
        );

        let feed_b = match b {
            SourceOutcome::Fetched(v) => v,
            other => {
                info!(source = self.supplement.id(), outcome = other.label(), "continuing without supplement");
                Vec::new()
            }
        };

        let feed_a = match a {
            SourceOutcome::Fetched(v) => v,
            other => self.degraded_primary(other)?,
        };

        let feed = self.correlator.correlate(&feed_a, &feed_b);

        let elapsed_ms = started.elapsed().as_millis() as f64;
        histogram!("feed_run_ms").record(elapsed_ms);
        gauge!("feed_last_run_ts").set(Utc::now().timestamp() as f64);
        info!(
            fixtures = feed.len(),
            supplemented = feed.iter().filter(|f| f.has_supplement).count(),
            elapsed_ms,
            "feed aggregated"
        );

        Ok(feed)
    }

    fn degraded_primary(&self, outcome: SourceOutcome) -> Result<Vec<EnrichedFixture>> {
        if self.fallback.is_empty() {
            return match outcome {
                SourceOutcome::Unavailable(e) => Err(AggregationError::Unavailable {
                    source_id: self.primary.id().to_string(),
                    reason: e.to_string(),
                }),
                _ => Ok(Vec::new()),
            };
        }

        counter!("feed_fallback_total").increment(1);
        warn!(
            source = self.primary.id(),
            outcome = outcome.label(),
            entries = self.fallback.len(),
            "serving fallback dataset"
        );
        Ok(fallback_fixtures(
            &self.fallback,
            Utc::now(),
            self.primary.listing_url().as_str(),
            &self.placeholder_base,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::relay::{MockReply, MockTransport};

    const LISTING: &str = r#"<html><body>
<h4>18.10.2026</h4>
<button class="accordion">19:00 Arsenal vs Chelsea</button>
<div class="panel"><a href="/aw/x.php">watch</a></div>
</body></html>"#;

    fn cfg() -> FeedConfig {
        let mut c = FeedConfig::default();
        c.relays = vec!["direct".into()];
        c.retries_per_relay = 1;
        c.detail_retries_per_relay = 1;
        c.retry_delay_ms = 0;
        c.primary.listing_url = "https://a.test/list".into();
        c.supplement.listing_url = "https://b.test/list".into();
        c
    }

    #[tokio::test]
    async fn empty_primary_with_fallback_serves_the_seed() {
        let t = MockTransport::new()
            .route("https://a.test/list", MockReply::Body("<html></html>".into()))
            .route("https://b.test/list", MockReply::Status(500));
        let agg = Aggregator::from_config(&cfg(), Arc::new(t)).unwrap();
        let feed = agg.get_aggregated_feed().await.unwrap();
        assert_eq!(feed.len(), 4);
        assert!(feed.iter().all(|f| f.fixture.source_id == "fallback"));
    }

    #[tokio::test]
    async fn empty_primary_without_fallback_is_an_empty_feed() {
        let mut c = cfg();
        c.fallback.clear();
        let t = MockTransport::new().route("https://a.test/list", MockReply::Body(String::new()));
        let agg = Aggregator::from_config(&c, Arc::new(t)).unwrap();
        assert!(agg.get_aggregated_feed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_primary_without_fallback_is_unavailable() {
        let mut c = cfg();
        c.fallback.clear();
        let t = MockTransport::new().route("https://a.test/", MockReply::Error);
        let agg = Aggregator::from_config(&c, Arc::new(t)).unwrap();
        let err = agg.get_aggregated_feed().await.unwrap_err();
        assert!(matches!(err, AggregationError::Unavailable { ref source_id, .. } if source_id == "primary"));
    }

    #[tokio::test]
    async fn supplement_failure_only_clears_flags() {
        let t = MockTransport::new()
            .route("https://a.test/list", MockReply::Body(LISTING.into()))
            .route("https://a.test/aw/x.php", MockReply::Status(404))
            .route("https://b.test/", MockReply::Error);
        let agg = Aggregator::from_config(&cfg(), Arc::new(t)).unwrap();
        let feed = agg.get_aggregated_feed().await.unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].home_team(), "Arsenal");
        assert!(!feed[0].has_supplement);
        assert_eq!(feed[0].fixture.detail_url, "https://a.test/aw/x.php");
    }

    #[test]
    fn invalid_strategy_name_fails_construction() {
        let mut c = cfg();
        c.primary.strategies = vec!["telepathy".into()];
        let err = Aggregator::from_config(&c, Arc::new(MockTransport::new()))
            .err()
            .unwrap();
        assert!(matches!(err, AggregationError::Config(_)));
    }
}
