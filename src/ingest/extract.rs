// src/ingest/extract.rs
//! Listing-page extraction.
//!
//! Upstream markup is not stable, so a [`ScheduleExtractor`] runs an ordered chain of
//! independent strategies and keeps the output of the first one that yields anything.
//! Located entries are never dropped for missing fields: absent team names become
//! `"Unknown"`, absent links become an empty `detail_ref`, absent times become "now".

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::error::{AggregationError, Result};
use crate::ingest::types::RawFixture;

pub const UNKNOWN_TEAM: &str = "Unknown";

/// Names of the built-in strategies, in default chain order.
pub const DEFAULT_STRATEGIES: [&str; 4] = [
    "schedule_buttons",
    "listing_anchors",
    "entry_selectors",
    "text_lines",
];

/// Extraction-time context shared by all strategies.
#[derive(Debug, Clone, Copy)]
pub struct ExtractContext {
    /// Degraded default for entries without a parseable clock time.
    pub now: DateTime<Utc>,
}

/// A pure `document -> [RawFixture]` pass.
pub trait ExtractStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, doc: &Html, ctx: &ExtractContext) -> Vec<RawFixture>;
}

pub struct ScheduleExtractor {
    strategies: Vec<Box<dyn ExtractStrategy>>,
}

impl ScheduleExtractor {
    pub fn new(strategies: Vec<Box<dyn ExtractStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn with_defaults() -> Self {
        Self::new(
            DEFAULT_STRATEGIES
                .iter()
                .filter_map(|n| strategy_by_name(n))
                .collect(),
        )
    }

    /// Build a chain from configured names; unknown names are a config error.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        if names.is_empty() {
            return Ok(Self::with_defaults());
        }
        let mut strategies = Vec::with_capacity(names.len());
        for n in names {
            let s = strategy_by_name(n.as_ref()).ok_or_else(|| {
                AggregationError::Config(format!("unknown extract strategy '{}'", n.as_ref()))
            })?;
            strategies.push(s);
        }
        Ok(Self::new(strategies))
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn extract(&self, raw_html: &str) -> Vec<RawFixture> {
        self.extract_at(raw_html, Utc::now())
    }

    /// Run the chain against `raw_html`; an empty result is a valid outcome.
    pub fn extract_at(&self, raw_html: &str, now: DateTime<Utc>) -> Vec<RawFixture> {
        let doc = Html::parse_document(raw_html);
        let ctx = ExtractContext { now };
        for strategy in &self.strategies {
            let found = strategy.extract(&doc, &ctx);
            if !found.is_empty() {
                debug!(strategy = strategy.name(), count = found.len(), "extraction hit");
                return found;
            }
            debug!(strategy = strategy.name(), "extraction strategy found nothing");
        }
        Vec::new()
    }
}

impl Default for ScheduleExtractor {
    fn default() -> Self {
        Self::with_defaults()
    }
}

pub fn strategy_by_name(name: &str) -> Option<Box<dyn ExtractStrategy>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "schedule_buttons" => Some(Box::new(ScheduleButtons)),
        "listing_anchors" => Some(Box::new(ListingAnchors)),
        "entry_selectors" => Some(Box::new(EntrySelectors)),
        "text_lines" => Some(Box::new(TextLines)),
        _ => None,
    }
}

/* ----------------------------
Shared helpers
---------------------------- */

static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));
static RE_CLOCK_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2}):(\d{2})(?:\s+|$)(.*)$").expect("clock regex"));
static RE_CLOCK_ANY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2}):(\d{2})\b").expect("clock regex"));
static RE_DATE_DMY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{2})\.(\d{2})\.(\d{4})\b").expect("dmy regex"));
static RE_DATE_YMD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("ymd regex"));
static RE_VS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.+?)\s+(?:vs\.?|v\.?)\s+(.+)$").expect("vs regex"));
static RE_VS_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+(?:vs\.?|v\.?)\s+").expect("vs split regex"));

static SEL_HEADERS_AND_BUTTONS: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("h1, h2, h3, h4, h5, h6, button.accordion").expect("static selector")
});
static SEL_HEADERS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h1, h2, h3, h4, h5, h6").expect("static selector"));
static SEL_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("static selector"));
static SEL_TIME: Lazy<Selector> =
    Lazy::new(|| Selector::parse("time[datetime]").expect("static selector"));
static SEL_LISTING_ANCHORS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("ul.competitions li a").expect("static selector"));
static SEL_HOME_ROW: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".col-8 .row:nth-child(1) .col-10").expect("static selector")
});
static SEL_AWAY_ROW: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".col-8 .row:nth-child(2) .col-10").expect("static selector")
});

const ENTRY_SELECTORS: [&str; 9] = [
    ".match-item",
    ".schedule-item",
    ".game-item",
    ".fixture",
    ".match",
    ".event",
    "[data-match]",
    ".list-group-item",
    "tr",
];

/// Tokens that mark a "vs" line as scheduling metadata rather than a fixture.
const META_TOKENS: [&str; 5] = ["time", "times", "kickoff", "schedule", "date"];

/// Free-text lines longer than this are prose, not fixtures.
const MAX_LINE_CHARS: usize = 120;

pub(crate) fn collapse_ws(s: &str) -> String {
    RE_WS.replace_all(s, " ").trim().to_string()
}

fn element_text(el: &ElementRef<'_>) -> String {
    collapse_ws(&el.text().collect::<Vec<_>>().join(" "))
}

fn clean_name(s: &str) -> String {
    collapse_ws(s)
        .trim_matches(|c: char| matches!(c, '-' | '|' | ':' | ',' | '.') || c.is_whitespace())
        .to_string()
}

fn or_unknown(s: String) -> String {
    if s.is_empty() {
        UNKNOWN_TEAM.to_string()
    } else {
        s
    }
}

/// Split a leading `HH:MM` off an entry label.
fn split_clock(label: &str) -> (Option<NaiveTime>, String) {
    let label = label.trim();
    match RE_CLOCK_PREFIX.captures(label) {
        Some(c) => {
            let t = clock_from(&c[1], &c[2]);
            if t.is_some() {
                (t, c[3].trim().to_string())
            } else {
                (None, label.to_string())
            }
        }
        None => (None, label.to_string()),
    }
}

fn clock_from(h: &str, m: &str) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)
}

fn find_clock(text: &str) -> Option<NaiveTime> {
    RE_CLOCK_ANY
        .captures_iter(text)
        .find_map(|c| clock_from(&c[1], &c[2]))
}

pub(crate) fn parse_date(text: &str) -> Option<NaiveDate> {
    if let Some(c) = RE_DATE_DMY.captures(text) {
        if let Some(d) =
            NaiveDate::from_ymd_opt(c[3].parse().ok()?, c[2].parse().ok()?, c[1].parse().ok()?)
        {
            return Some(d);
        }
    }
    let c = RE_DATE_YMD.captures(text)?;
    NaiveDate::from_ymd_opt(c[1].parse().ok()?, c[2].parse().ok()?, c[3].parse().ok()?)
}

/// Combine a block date and an entry clock; missing clock degrades to `now`.
fn resolve_time(date: Option<NaiveDate>, clock: Option<NaiveTime>, now: DateTime<Utc>) -> DateTime<Utc> {
    match (date, clock) {
        (Some(d), Some(t)) => d.and_time(t).and_utc(),
        (None, Some(t)) => now.date_naive().and_time(t).and_utc(),
        _ => now,
    }
}

/// Strict pair parse used by the loose strategies.
fn split_pair(text: &str) -> Option<(String, String)> {
    let c = RE_VS.captures(text)?;
    Some((clean_name(&c[1]), clean_name(&c[2])))
}

fn is_meta(name: &str) -> bool {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .any(|tok| META_TOKENS.contains(&tok))
}

fn is_plausible_pair(home: &str, away: &str) -> bool {
    home.chars().count() > 2 && away.chars().count() > 2 && !is_meta(home) && !is_meta(away)
}

fn first_link(el: &ElementRef<'_>) -> Option<String> {
    if el.value().name() == "a" {
        if let Some(href) = el.value().attr("href") {
            return Some(href.trim().to_string());
        }
    }
    el.select(&SEL_LINK)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(|h| h.trim().to_string())
}

fn first_date_header(doc: &Html) -> Option<NaiveDate> {
    doc.select(&SEL_HEADERS)
        .find_map(|h| parse_date(&element_text(&h)))
}

/* ----------------------------
Strategies
---------------------------- */

/// Accordion-style schedules: a date header followed by `button.accordion`
/// entries labelled `HH:MM Home vs Away`, each followed by a panel with links.
pub struct ScheduleButtons;

impl ExtractStrategy for ScheduleButtons {
    fn name(&self) -> &'static str {
        "schedule_buttons"
    }

    fn extract(&self, doc: &Html, ctx: &ExtractContext) -> Vec<RawFixture> {
        let mut out = Vec::new();
        let mut block_date: Option<NaiveDate> = None;

        for el in doc.select(&SEL_HEADERS_AND_BUTTONS) {
            if el.value().name() != "button" {
                if let Some(d) = parse_date(&element_text(&el)) {
                    block_date = Some(d);
                }
                continue;
            }

            let (clock, rest) = split_clock(&element_text(&el));
            let mut parts = RE_VS_SPLIT.splitn(&rest, 2);
            let home = or_unknown(clean_name(parts.next().unwrap_or_default()));
            let away = or_unknown(clean_name(parts.next().unwrap_or_default()));

            let detail_ref = first_link(&el)
                .or_else(|| {
                    el.next_siblings()
                        .find_map(ElementRef::wrap)
                        .filter(|panel| panel.value().name() != "button")
                        .and_then(|panel| first_link(&panel))
                })
                .unwrap_or_default();

            out.push(RawFixture::new(
                home,
                away,
                detail_ref,
                resolve_time(block_date, clock, ctx.now),
            ));
        }
        out
    }
}

/// Card listings: `ul.competitions li a` with one nested row per team.
pub struct ListingAnchors;

impl ExtractStrategy for ListingAnchors {
    fn name(&self) -> &'static str {
        "listing_anchors"
    }

    fn extract(&self, doc: &Html, ctx: &ExtractContext) -> Vec<RawFixture> {
        let page_date = first_date_header(doc);
        doc.select(&SEL_LISTING_ANCHORS)
            .map(|a| {
                let pick = |sel: &Selector| {
                    a.select(sel)
                        .next()
                        .map(|e| clean_name(&element_text(&e)))
                        .unwrap_or_default()
                };
                let home = or_unknown(pick(&SEL_HOME_ROW));
                let away = or_unknown(pick(&SEL_AWAY_ROW));
                let detail_ref = a
                    .value()
                    .attr("href")
                    .map(|h| h.trim().to_string())
                    .unwrap_or_default();

                let explicit = a
                    .select(&SEL_TIME)
                    .next()
                    .and_then(|t| t.value().attr("datetime"))
                    .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
                    .map(|dt| dt.with_timezone(&Utc));
                let approx_time = explicit.unwrap_or_else(|| {
                    resolve_time(page_date, find_clock(&element_text(&a)), ctx.now)
                });

                RawFixture::new(home, away, detail_ref, approx_time)
            })
            .collect()
    }
}

/// Generic entry containers whose text reads `[HH:MM] Home vs Away`.
/// The first selector that yields at least one pair wins.
pub struct EntrySelectors;

impl ExtractStrategy for EntrySelectors {
    fn name(&self) -> &'static str {
        "entry_selectors"
    }

    fn extract(&self, doc: &Html, ctx: &ExtractContext) -> Vec<RawFixture> {
        let page_date = first_date_header(doc);
        for raw_sel in ENTRY_SELECTORS {
            let Ok(sel) = Selector::parse(raw_sel) else {
                continue;
            };
            let found: Vec<RawFixture> = doc
                .select(&sel)
                .filter_map(|el| {
                    let (clock, rest) = split_clock(&element_text(&el));
                    let (home, away) = split_pair(&rest)?;
                    if !is_plausible_pair(&home, &away) {
                        return None;
                    }
                    let detail_ref = first_link(&el).unwrap_or_default();
                    Some(RawFixture::new(
                        home,
                        away,
                        detail_ref,
                        resolve_time(page_date, clock, ctx.now),
                    ))
                })
                .collect();
            if !found.is_empty() {
                debug!(selector = raw_sel, count = found.len(), "entry selector matched");
                return found;
            }
        }
        Vec::new()
    }
}

fn is_line_break(tag: &str) -> bool {
    matches!(
        tag,
        "p" | "div"
            | "li"
            | "tr"
            | "br"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "section"
            | "article"
            | "header"
            | "footer"
            | "table"
            | "ul"
            | "ol"
            | "button"
    )
}

/// Last resort: scan the visible text line by line for `Home vs Away`.
pub struct TextLines;

impl ExtractStrategy for TextLines {
    fn name(&self) -> &'static str {
        "text_lines"
    }

    fn extract(&self, doc: &Html, ctx: &ExtractContext) -> Vec<RawFixture> {
        let mut page_text = String::new();
        for node in doc.root_element().descendants() {
            if let Some(el) = node.value().as_element() {
                // block boundaries end a line even in minified markup
                if is_line_break(el.name()) {
                    page_text.push('\n');
                }
                continue;
            }
            let Some(text) = node.value().as_text() else {
                continue;
            };
            let hidden = node
                .parent()
                .and_then(|p| p.value().as_element().map(|e| e.name().to_string()))
                .is_some_and(|n| matches!(n.as_str(), "script" | "style" | "noscript"));
            if !hidden {
                page_text.push_str(text);
            }
        }

        let mut block_date: Option<NaiveDate> = None;
        let mut out = Vec::new();
        for line in page_text.lines().map(collapse_ws) {
            if line.is_empty() || line.chars().count() > MAX_LINE_CHARS {
                continue;
            }
            let (clock, rest) = split_clock(&line);
            let Some((home, away)) = split_pair(&rest) else {
                if let Some(d) = parse_date(&line) {
                    block_date = Some(d);
                }
                continue;
            };
            if !is_plausible_pair(&home, &away) {
                continue;
            }
            out.push(RawFixture::new(
                home,
                away,
                "",
                resolve_time(block_date, clock, ctx.now),
            ));
        }
        out
    }
}
