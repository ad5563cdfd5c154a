// tests/enrich_windows.rs
//
// Windowed detail enrichment under randomized latency.
// Covered:
// - output order equals input order whatever order fetches finish in
// - never more than `concurrency_limit` detail fetches in flight
// - window k+1 starts only after every fetch of window k settled
// - a failing detail page degrades only its own fixture

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use url::Url;

use live_feed_aggregator::ingest::enrich::{DetailEnricher, LogoMemo};
use live_feed_aggregator::ingest::relay::{FetchPolicy, HttpResponse, RelayFetchClient, Transport};
use live_feed_aggregator::RawFixture;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Start(usize),
    End(usize),
}

/// Serves `/d/<i>` detail pages after a per-page random delay; `/d/<fail>` answers 500.
struct LatencyTransport {
    delays: Vec<Duration>,
    fail: Option<usize>,
    events: Mutex<Vec<Event>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl LatencyTransport {
    fn new(n: usize, seed: u64, fail: Option<usize>) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let delays = (0..n)
            .map(|_| Duration::from_millis(rng.random_range(5..400)))
            .collect();
        Self {
            delays,
            fail,
            events: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Transport for LatencyTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        let idx: usize = url
            .rsplit('/')
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| anyhow::anyhow!("unexpected url {url}"))?;

        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_in_flight, Ordering::SeqCst);
        self.events.lock().push(Event::Start(idx));

        tokio::time::sleep(self.delays[idx]).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.events.lock().push(Event::End(idx));

        if self.fail == Some(idx) {
            return Ok(HttpResponse { status: 500, body: String::new() });
        }
        Ok(HttpResponse {
            status: 200,
            body: format!(
                r#"<html><body>
<div class="header"><h2 class="title">Match <small><span>2026-10-18 {:02}:00</span></small></h2></div>
<img alt="Home {idx}" src="/logo/{idx}-home.png">
<img alt="Away {idx}" src="/logo/{idx}-away.png">
</body></html>"#,
                idx % 24
            ),
        })
    }
}

fn raw_fixtures(n: usize) -> Vec<RawFixture> {
    let t = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
    (0..n)
        .map(|i| RawFixture::new(format!("Home {i}"), format!("Away {i}"), format!("/d/{i}"), t))
        .collect()
}

fn enricher(transport: Arc<LatencyTransport>, limit: usize) -> DetailEnricher {
    let client = Arc::new(RelayFetchClient::from_templates(transport, &["direct"]));
    DetailEnricher::new(
        client,
        FetchPolicy::new(10_000, 1, 0),
        limit,
        "primary",
        Url::parse("https://a.test/list").unwrap(),
    )
}

#[tokio::test(start_paused = true)]
async fn output_order_matches_input_under_random_latency() {
    for seed in [1u64, 7, 42, 1337] {
        let n = 11;
        let transport = Arc::new(LatencyTransport::new(n, seed, None));
        let out = enricher(transport.clone(), 4)
            .enrich(raw_fixtures(n), &mut LogoMemo::new())
            .await;

        assert_eq!(out.len(), n);
        for (i, fx) in out.iter().enumerate() {
            assert_eq!(fx.home_team, format!("Home {i}"), "seed {seed}");
            assert_eq!(fx.home_logo_url, format!("https://a.test/logo/{i}-home.png"));
            assert_eq!(fx.away_logo_url, format!("https://a.test/logo/{i}-away.png"));
            assert_eq!(fx.detail_url, format!("https://a.test/d/{i}"));
            assert_eq!(
                fx.kickoff_time,
                Utc.with_ymd_and_hms(2026, 10, 18, (i % 24) as u32, 0, 0).unwrap()
            );
        }
        assert!(transport.peak.load(Ordering::SeqCst) <= 4, "seed {seed}");
    }
}

#[tokio::test(start_paused = true)]
async fn windows_settle_before_the_next_one_starts() {
    let (n, limit) = (10, 3);
    let transport = Arc::new(LatencyTransport::new(n, 99, None));
    enricher(transport.clone(), limit)
        .enrich(raw_fixtures(n), &mut LogoMemo::new())
        .await;

    let events = transport.events.lock().clone();
    assert_eq!(events.len(), 2 * n);
    let pos = |e: Event| events.iter().position(|x| *x == e).unwrap();

    for w in 1..n.div_ceil(limit) {
        let last_end_prev = ((w - 1) * limit..w * limit).map(|i| pos(Event::End(i))).max().unwrap();
        let first_start = (w * limit..((w + 1) * limit).min(n))
            .map(|i| pos(Event::Start(i)))
            .min()
            .unwrap();
        assert!(last_end_prev < first_start, "window {w} started early");
    }
}

#[tokio::test(start_paused = true)]
async fn failing_detail_degrades_only_its_fixture() {
    let n = 6;
    let transport = Arc::new(LatencyTransport::new(n, 5, Some(2)));
    let raw = raw_fixtures(n);
    let approx = raw[2].approx_time;
    let out = enricher(transport, 3).enrich(raw, &mut LogoMemo::new()).await;

    assert_eq!(out.len(), n);
    assert!(out[2].home_logo_url.starts_with("https://ui-avatars.com/api/?name=Home+2"));
    assert_eq!(out[2].kickoff_time, approx);
    assert_eq!(out[2].detail_url, "https://a.test/d/2");
    for i in [0, 1, 3, 4, 5] {
        assert_eq!(out[i].home_logo_url, format!("https://a.test/logo/{i}-home.png"));
    }
}
