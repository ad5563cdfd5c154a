// src/ingest/correlate.rs
//! Cross-source correlation.
//!
//! The primary feed is authoritative for the listing; the supplement feed only
//! flags which primary fixtures have extra content. Pairing is orientation
//! insensitive and the first supplement candidate wins.

use std::collections::HashSet;
use std::sync::Arc;

use metrics::counter;
use tracing::debug;

use crate::ingest::matcher::TeamNameMatcher;
use crate::ingest::types::{EnrichedFixture, Fixture};

pub struct FeedCorrelator {
    matcher: Arc<dyn TeamNameMatcher>,
}

impl FeedCorrelator {
    pub fn new(matcher: Arc<dyn TeamNameMatcher>) -> Self {
        Self { matcher }
    }

    pub fn matcher_name(&self) -> &'static str {
        self.matcher.name()
    }

    /// Same pair of teams, in either orientation.
    pub fn same_pairing(&self, a: &EnrichedFixture, b: &EnrichedFixture) -> bool {
        let m = &self.matcher;
        (m.matches(&a.home_team, &b.home_team) && m.matches(&a.away_team, &b.away_team))
            || (m.matches(&a.home_team, &b.away_team) && m.matches(&a.away_team, &b.home_team))
    }

    pub fn find_supplement<'b>(
        &self,
        fixture: &EnrichedFixture,
        feed_b: &'b [EnrichedFixture],
    ) -> Option<&'b EnrichedFixture> {
        feed_b.iter().find(|b| self.same_pairing(fixture, b))
    }

    /// Flag, de-duplicate and order `feed_a` against `feed_b`.
    pub fn correlate(&self, feed_a: &[EnrichedFixture], feed_b: &[EnrichedFixture]) -> Vec<Fixture> {
        let (unique, dropped) = dedup_by_id(feed_a);
        if dropped > 0 {
            debug!(dropped, "duplicate primary fixtures removed");
        }

        let mut out: Vec<Fixture> = unique
            .into_iter()
            .map(|fx| match self.find_supplement(fx, feed_b) {
                Some(b) => {
                    debug!(home = %fx.home_team, away = %fx.away_team, supplement = %b.detail_url, "supplement found");
                    Fixture::with_supplement(fx.clone(), b.detail_url.clone())
                }
                None => Fixture::without_supplement(fx.clone()),
            })
            .collect();

        let matched = out.iter().filter(|f| f.has_supplement).count();
        counter!("feed_supplement_matches_total").increment(matched as u64);

        sort_feed(&mut out);
        out
    }
}

/// First occurrence of each id, input order kept.
pub fn dedup_by_id(feed: &[EnrichedFixture]) -> (Vec<&EnrichedFixture>, usize) {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut keep = Vec::with_capacity(feed.len());
    let mut dropped = 0usize;
    for fx in feed {
        if seen.insert(fx.id.as_str()) {
            keep.push(fx);
        } else {
            dropped += 1;
        }
    }
    (keep, dropped)
}

/// Supplemented fixtures first, then ascending kickoff. Stable for ties.
pub fn sort_feed(feed: &mut [Fixture]) {
    feed.sort_by_key(|f| (!f.has_supplement, f.kickoff_time()));
}
