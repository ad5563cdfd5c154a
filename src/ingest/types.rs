// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of an upstream source, e.g. "primary" or "supplement".
pub type SourceId = String;

/// Match record as located on a listing page, before any detail fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RawFixture {
    pub home_team: String,
    pub away_team: String,
    /// Link exactly as found on the page (may be relative, may be empty).
    pub detail_ref: String,
    pub approx_time: DateTime<Utc>,
}

impl RawFixture {
    pub fn new(
        home_team: impl Into<String>,
        away_team: impl Into<String>,
        detail_ref: impl Into<String>,
        approx_time: DateTime<Utc>,
    ) -> Self {
        Self {
            home_team: home_team.into(),
            away_team: away_team.into(),
            detail_ref: detail_ref.into(),
            approx_time,
        }
    }
}

/// Raw fixture plus artwork and a resolved kickoff time.
///
/// Logo URLs are never empty: a failed lookup leaves a placeholder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedFixture {
    pub id: String,
    pub source_id: SourceId,
    pub home_team: String,
    pub away_team: String,
    pub detail_ref: String,
    pub detail_url: String,
    pub approx_time: DateTime<Utc>,
    pub kickoff_time: DateTime<Utc>,
    pub home_logo_url: String,
    pub away_logo_url: String,
}

/// Final feed item handed to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Fixture {
    #[serde(flatten)]
    pub fixture: EnrichedFixture,
    pub has_supplement: bool,
    pub supplement_url: Option<String>,
}

impl Fixture {
    pub fn with_supplement(fixture: EnrichedFixture, supplement_url: impl Into<String>) -> Self {
        Self {
            fixture,
            has_supplement: true,
            supplement_url: Some(supplement_url.into()),
        }
    }

    pub fn without_supplement(fixture: EnrichedFixture) -> Self {
        Self {
            fixture,
            has_supplement: false,
            supplement_url: None,
        }
    }

    pub fn home_team(&self) -> &str {
        &self.fixture.home_team
    }

    pub fn away_team(&self) -> &str {
        &self.fixture.away_team
    }

    pub fn kickoff_time(&self) -> DateTime<Utc> {
        self.fixture.kickoff_time
    }
}

/// Stable id: `<source>-<home>-<away>`, lowercased with whitespace runs as `-`.
pub fn fixture_id(source_id: &str, home: &str, away: &str) -> String {
    let slug = |s: &str| {
        s.split_whitespace()
            .map(|w| w.to_lowercase())
            .collect::<Vec<_>>()
            .join("-")
    };
    format!("{}-{}-{}", slug(source_id), slug(home), slug(away))
}
