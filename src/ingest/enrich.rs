// src/ingest/enrich.rs
//! Per-fixture detail enrichment.
//!
//! Fixtures are processed in fixed windows of `concurrency_limit`: all detail fetches
//! of a window run concurrently and the next window starts once every one has settled.
//! Results are written back by input index. A failed fixture degrades to placeholder
//! artwork and its listing time; it never affects siblings or the run.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{AggregationError, Result};
use crate::ingest::relay::{FetchPolicy, RelayFetchClient};
use crate::ingest::types::{fixture_id, EnrichedFixture, RawFixture, SourceId};

pub const DEFAULT_PLACEHOLDER_LOGO_BASE: &str = "https://ui-avatars.com/api/";

/// Why a fixture kept (some of) its degraded defaults. Diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradeReason {
    /// Every relay failed for the detail page.
    RelayExhausted,
    /// The listing entry carried no detail link.
    NoDetailLink,
    /// The detail link could not be resolved to an http(s) URL.
    InvalidDetailUrl,
    /// Detail fetching is switched off for this source.
    Disabled,
    /// The page was fetched but lacked a logo or kickoff time.
    ParseMiss,
    /// The enrichment task itself died.
    TaskFailed,
}

/// Team-name → artwork resolved earlier in the same run.
#[derive(Debug, Clone, Default)]
pub struct LogoMemo {
    logos: HashMap<String, String>,
}

impl LogoMemo {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(team: &str) -> String {
        team.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    pub fn get(&self, team: &str) -> Option<&str> {
        self.logos.get(&Self::key(team)).map(String::as_str)
    }

    /// First resolution wins; later ones for the same team are ignored.
    pub fn record(&mut self, team: &str, logo_url: &str) {
        if team.trim().is_empty() || logo_url.is_empty() {
            return;
        }
        self.logos
            .entry(Self::key(team))
            .or_insert_with(|| logo_url.to_string());
    }

    pub fn len(&self) -> usize {
        self.logos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logos.is_empty()
    }
}

/// Deterministic initials-avatar URL for a team.
pub fn placeholder_logo(base: &str, team: &str) -> String {
    let team = team.trim();
    let digest = Sha256::digest(team.to_lowercase().as_bytes());
    let background: String = digest.iter().take(3).map(|b| format!("{b:02x}")).collect();
    let name: String = url::form_urlencoded::byte_serialize(team.as_bytes()).collect();
    let sep = if base.contains('?') { '&' } else { '?' };
    format!("{base}{sep}name={name}&background={background}&color=fff")
}

/// Resolve a listing/detail reference against `base`; only http(s) results are accepted.
pub fn resolve_ref(base: &Url, reference: &str) -> Result<Url> {
    let reference = reference.trim();
    let invalid = |reason: String| AggregationError::InvalidUrl {
        url: reference.to_string(),
        reason,
    };
    let url = base.join(reference).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme '{other}'"))),
    }
}

/* ----------------------------
Detail page parsing
---------------------------- */

static SEL_IMG_ALT: Lazy<Selector> =
    Lazy::new(|| Selector::parse("img[alt]").expect("static selector"));
static SEL_HOME_SIDE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".match-view-head-side1 img").expect("static selector"));
static SEL_AWAY_SIDE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".match-view-head-side2 img").expect("static selector"));
static SEL_KICKOFF: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".header h2.title small span").expect("static selector"));
static SEL_TIME: Lazy<Selector> =
    Lazy::new(|| Selector::parse("time[datetime]").expect("static selector"));
static RE_DATETIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{4}-\d{2}-\d{2})[ T](\d{2}:\d{2})").expect("datetime regex")
});

/// What a detail page yielded. `None` fields fall back to degraded defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailPage {
    pub home_logo: Option<String>,
    pub away_logo: Option<String>,
    pub kickoff: Option<DateTime<Utc>>,
}

impl DetailPage {
    fn is_complete(&self) -> bool {
        self.home_logo.is_some() && self.away_logo.is_some() && self.kickoff.is_some()
    }
}

fn img_src(img: &scraper::ElementRef<'_>, page: &Url) -> Option<String> {
    let v = img.value();
    let src = v.attr("src").or_else(|| v.attr("data-src"))?.trim();
    if src.is_empty() {
        return None;
    }
    page.join(src).ok().map(|u| u.to_string())
}

fn logo_for(doc: &Html, page: &Url, team: &str, side: &Selector) -> Option<String> {
    let wanted = team.trim().to_lowercase();
    let by_alt = doc
        .select(&SEL_IMG_ALT)
        .filter(|img| {
            img.value()
                .attr("alt")
                .is_some_and(|alt| alt.trim().to_lowercase() == wanted)
        })
        .find_map(|img| img_src(&img, page));
    by_alt.or_else(|| doc.select(side).find_map(|img| img_src(&img, page)))
}

fn datetime_in(text: &str) -> Option<DateTime<Utc>> {
    let c = RE_DATETIME.captures(text)?;
    NaiveDateTime::parse_from_str(&format!("{} {}", &c[1], &c[2]), "%Y-%m-%d %H:%M")
        .ok()
        .map(|dt| dt.and_utc())
}

fn kickoff_in(doc: &Html) -> Option<DateTime<Utc>> {
    if let Some(t) = doc
        .select(&SEL_KICKOFF)
        .find_map(|e| datetime_in(&e.text().collect::<String>()))
    {
        return Some(t);
    }
    if let Some(t) = doc
        .select(&SEL_TIME)
        .filter_map(|e| e.value().attr("datetime"))
        .find_map(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
    {
        return Some(t.with_timezone(&Utc));
    }
    datetime_in(&doc.root_element().text().collect::<Vec<_>>().join(" "))
}

/// Pull artwork and kickoff time out of a detail page. Times are read as UTC.
pub fn parse_detail(html: &str, page: &Url, home: &str, away: &str) -> DetailPage {
    let doc = Html::parse_document(html);
    DetailPage {
        home_logo: logo_for(&doc, page, home, &SEL_HOME_SIDE),
        away_logo: logo_for(&doc, page, away, &SEL_AWAY_SIDE),
        kickoff: kickoff_in(&doc),
    }
}

/* ----------------------------
Enricher
---------------------------- */

type DetailOutcome = std::result::Result<DetailPage, DegradeReason>;

pub struct DetailEnricher {
    client: Arc<RelayFetchClient>,
    policy: FetchPolicy,
    concurrency_limit: usize,
    source_id: SourceId,
    listing_url: Url,
    placeholder_base: String,
    fetch_details: bool,
}

impl DetailEnricher {
    pub fn new(
        client: Arc<RelayFetchClient>,
        policy: FetchPolicy,
        concurrency_limit: usize,
        source_id: impl Into<SourceId>,
        listing_url: Url,
    ) -> Self {
        Self {
            client,
            policy,
            concurrency_limit: concurrency_limit.max(1),
            source_id: source_id.into(),
            listing_url,
            placeholder_base: DEFAULT_PLACEHOLDER_LOGO_BASE.to_string(),
            fetch_details: true,
        }
    }

    pub fn with_placeholder_base(mut self, base: impl Into<String>) -> Self {
        self.placeholder_base = base.into();
        self
    }

    pub fn with_detail_fetch(mut self, enabled: bool) -> Self {
        self.fetch_details = enabled;
        self
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// Exactly one output per input, in input order.
    pub async fn enrich(&self, raw: Vec<RawFixture>, memo: &mut LogoMemo) -> Vec<EnrichedFixture> {
        let mut outcomes: Vec<Option<DetailOutcome>> = vec![None; raw.len()];
        let mut detail_urls: Vec<Url> = Vec::with_capacity(raw.len());

        for (window_no, window) in raw.chunks(self.concurrency_limit).enumerate() {
            let offset = window_no * self.concurrency_limit;
            let mut set = JoinSet::new();

            for (i, fx) in window.iter().enumerate() {
                let idx = offset + i;
                let (target, skip) = self.detail_target(fx);
                detail_urls.push(target.clone());
                if let Some(reason) = skip {
                    outcomes[idx] = Some(Err(reason));
                    continue;
                }

                let client = Arc::clone(&self.client);
                let policy = self.policy;
                let (home, away) = (fx.home_team.clone(), fx.away_team.clone());
                set.spawn(async move {
                    let outcome = match client.fetch(target.as_str(), &policy).await {
                        Ok(html) => Ok(parse_detail(&html, &target, &home, &away)),
                        Err(e) => {
                            debug!(url = %target, error = %e, "detail fetch failed");
                            Err(DegradeReason::RelayExhausted)
                        }
                    };
                    (idx, outcome)
                });
            }

            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((idx, outcome)) => outcomes[idx] = Some(outcome),
                    Err(e) => warn!(source = %self.source_id, error = ?e, "detail task failed"),
                }
            }

            for (i, fx) in window.iter().enumerate() {
                if let Some(Ok(page)) = &outcomes[offset + i] {
                    if let Some(logo) = &page.home_logo {
                        memo.record(&fx.home_team, logo);
                    }
                    if let Some(logo) = &page.away_logo {
                        memo.record(&fx.away_team, logo);
                    }
                }
            }
        }

        let mut degraded = 0usize;
        let out: Vec<EnrichedFixture> = raw
            .into_iter()
            .zip(outcomes)
            .zip(detail_urls)
            .map(|((fx, outcome), detail_url)| {
                let outcome = outcome.unwrap_or(Err(DegradeReason::TaskFailed));
                let page = match outcome {
                    Ok(page) => {
                        if !page.is_complete() {
                            debug!(
                                source = %self.source_id,
                                home = %fx.home_team,
                                away = %fx.away_team,
                                reason = ?DegradeReason::ParseMiss,
                                "enrichment degraded"
                            );
                            degraded += 1;
                        }
                        page
                    }
                    Err(reason) => {
                        debug!(
                            source = %self.source_id,
                            home = %fx.home_team,
                            away = %fx.away_team,
                            ?reason,
                            "enrichment degraded"
                        );
                        degraded += 1;
                        DetailPage::default()
                    }
                };
                self.assemble(fx, page, detail_url, memo)
            })
            .collect();

        counter!("enrich_degraded_total").increment(degraded as u64);
        info!(
            source = %self.source_id,
            fixtures = out.len(),
            degraded,
            memo = memo.len(),
            "enrichment finished"
        );
        out
    }

    /// Detail URL for a fixture (the listing URL when there is no usable link),
    /// plus the reason to skip fetching it, if any.
    fn detail_target(&self, fx: &RawFixture) -> (Url, Option<DegradeReason>) {
        if fx.detail_ref.trim().is_empty() {
            return (self.listing_url.clone(), Some(DegradeReason::NoDetailLink));
        }
        match resolve_ref(&self.listing_url, &fx.detail_ref) {
            Ok(url) if self.fetch_details => (url, None),
            Ok(url) => (url, Some(DegradeReason::Disabled)),
            Err(e) => {
                debug!(source = %self.source_id, error = %e, "unusable detail link");
                (self.listing_url.clone(), Some(DegradeReason::InvalidDetailUrl))
            }
        }
    }

    fn assemble(
        &self,
        fx: RawFixture,
        page: DetailPage,
        detail_url: Url,
        memo: &LogoMemo,
    ) -> EnrichedFixture {
        let logo = |found: Option<String>, team: &str| {
            found
                .or_else(|| memo.get(team).map(str::to_string))
                .unwrap_or_else(|| placeholder_logo(&self.placeholder_base, team))
        };
        let home_logo_url = logo(page.home_logo, &fx.home_team);
        let away_logo_url = logo(page.away_logo, &fx.away_team);

        EnrichedFixture {
            id: fixture_id(&self.source_id, &fx.home_team, &fx.away_team),
            source_id: self.source_id.clone(),
            kickoff_time: page.kickoff.unwrap_or(fx.approx_time),
            home_logo_url,
            away_logo_url,
            detail_url: detail_url.to_string(),
            home_team: fx.home_team,
            away_team: fx.away_team,
            detail_ref: fx.detail_ref,
            approx_time: fx.approx_time,
        }
    }
}
