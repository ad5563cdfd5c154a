// src/ingest/matcher.rs
//! Approximate team-name identity across sources.
//!
//! - `normalize` is lossy and comparison-only: lowercase, punctuation to spaces,
//!   collapse whitespace, drop corporate tokens ("fc", "united", ...).
//! - `matches`: exact normalized → substring → shared abbreviation-table entry.
//! - Every rule is symmetric and reflexive; beyond that, false positives and
//!   negatives are accepted.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Tokens stripped by [`normalize`].
const STRIP_TOKENS: [&str; 6] = ["fc", "cf", "united", "city", "real", "atletico"];

/// Built-in abbreviation table: canonical club → known spellings.
const ABBREVIATIONS: &[(&str, &[&str])] = &[
    ("manchester united", &["man utd", "man united", "manchester utd", "mufc"]),
    ("manchester city", &["man city", "mcfc"]),
    ("tottenham", &["spurs", "tottenham hotspur"]),
    ("barcelona", &["barca", "fc barcelona"]),
    ("real madrid", &["madrid"]),
    ("atletico madrid", &["atleti", "atletico de madrid"]),
    ("paris saint germain", &["psg", "paris sg"]),
    ("inter", &["inter milan", "internazionale"]),
    ("bayern munich", &["bayern", "bayern munchen", "fc bayern"]),
    ("wolverhampton", &["wolves", "wolverhampton wanderers"]),
    ("newcastle", &["newcastle united", "toon"]),
    ("borussia dortmund", &["dortmund", "bvb"]),
];

/// Swappable identity heuristic used by the correlator.
pub trait TeamNameMatcher: Send + Sync {
    fn normalize(&self, name: &str) -> String {
        normalize(name)
    }
    fn matches(&self, a: &str, b: &str) -> bool;
    fn name(&self) -> &'static str;
}

/// Lowercase, dots/apostrophes dropped, other punctuation to spaces, collapsed
/// whitespace. No token stripping.
fn fold(name: &str) -> String {
    let lowered: String = name
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(*c, '.' | '\'' | '\u{2019}'))
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Comparison key for a team name.
pub fn normalize(name: &str) -> String {
    fold(name)
        .split(' ')
        .filter(|tok| !tok.is_empty() && !STRIP_TOKENS.contains(tok))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized form, or the folded form when stripping leaves nothing
/// (e.g. "Real" alone). An empty key would be a substring of everything.
fn key(name: &str) -> String {
    let n = normalize(name);
    if n.is_empty() {
        fold(name)
    } else {
        n
    }
}

/// User-extensible alias map from config: canonical → spellings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct AliasTable(pub HashMap<String, Vec<String>>);

#[derive(Debug, Clone)]
pub struct HeuristicMatcher {
    /// folded spelling → folded canonical
    lookup: HashMap<String, String>,
}

impl HeuristicMatcher {
    pub fn new() -> Self {
        Self::with_aliases(&AliasTable::default())
    }

    /// Built-in table extended (and overridden) by `extra`.
    pub fn with_aliases(extra: &AliasTable) -> Self {
        let mut lookup = HashMap::new();
        for (canon, spellings) in ABBREVIATIONS {
            insert_aliases(&mut lookup, canon, spellings.iter().copied());
        }
        for (canon, spellings) in &extra.0 {
            insert_aliases(&mut lookup, canon, spellings.iter().map(String::as_str));
        }
        Self { lookup }
    }

    /// Canonical club for a name, checking the folded then the normalized spelling.
    pub fn canonical(&self, name: &str) -> Option<&str> {
        let folded = fold(name);
        self.lookup
            .get(&folded)
            .or_else(|| self.lookup.get(&normalize(name)))
            .map(String::as_str)
    }
}

fn insert_aliases<'a>(
    lookup: &mut HashMap<String, String>,
    canon: &str,
    spellings: impl IntoIterator<Item = &'a str>,
) {
    let c = fold(canon);
    if c.is_empty() {
        return;
    }
    lookup.insert(c.clone(), c.clone());
    for s in spellings {
        let s = fold(s);
        if !s.is_empty() {
            lookup.insert(s, c.clone());
        }
    }
}

impl Default for HeuristicMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl TeamNameMatcher for HeuristicMatcher {
    fn matches(&self, a: &str, b: &str) -> bool {
        let (ka, kb) = (key(a), key(b));
        if ka == kb {
            return true;
        }
        if !ka.is_empty() && !kb.is_empty() && (ka.contains(&kb) || kb.contains(&ka)) {
            return true;
        }
        match (self.canonical(a), self.canonical(b)) {
            (Some(ca), Some(cb)) => ca == cb,
            _ => false,
        }
    }

    fn name(&self) -> &'static str {
        "heuristic"
    }
}

/// Heuristic rules plus Jaro-Winkler similarity of the normalized keys.
#[derive(Debug, Clone)]
pub struct SimilarityMatcher {
    base: HeuristicMatcher,
    threshold: f64,
}

impl SimilarityMatcher {
    pub fn new(base: HeuristicMatcher, threshold: f64) -> Self {
        Self {
            base,
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    /// Order-independent similarity in `[0, 1]`.
    pub fn similarity(a: &str, b: &str) -> f64 {
        let (ka, kb) = (key(a), key(b));
        strsim::jaro_winkler(&ka, &kb).max(strsim::jaro_winkler(&kb, &ka))
    }
}

impl TeamNameMatcher for SimilarityMatcher {
    fn matches(&self, a: &str, b: &str) -> bool {
        self.base.matches(a, b) || Self::similarity(a, b) >= self.threshold
    }

    fn name(&self) -> &'static str {
        "similarity"
    }
}
