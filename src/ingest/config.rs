// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

use crate::error::AggregationError;
use crate::ingest::enrich::DEFAULT_PLACEHOLDER_LOGO_BASE;
use crate::ingest::fallback::{default_seed, FallbackEntry, MAX_FALLBACK_OFFSET_MINUTES};
use crate::ingest::matcher::{AliasTable, HeuristicMatcher, SimilarityMatcher, TeamNameMatcher};
use crate::ingest::relay::FetchPolicy;

const ENV_PATH: &str = "FEED_CONFIG_PATH";
const ENV_TIMEOUT_MS: &str = "FEED_TIMEOUT_MS";
const ENV_RETRIES: &str = "FEED_RETRIES_PER_RELAY";
const ENV_CONCURRENCY: &str = "FEED_DETAIL_CONCURRENCY";
const ENV_RELAYS: &str = "FEED_RELAYS";

pub const PRIMARY_ID: &str = "primary";
pub const SUPPLEMENT_ID: &str = "supplement";

/// Relay chain used when nothing is configured: direct first, then two public relays.
pub fn default_relays() -> Vec<String> {
    vec![
        "direct".to_string(),
        "https://api.allorigins.win/raw?url=".to_string(),
        "https://corsproxy.io/?".to_string(),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeedConfig {
    pub relays: Vec<String>,
    pub timeout_ms: u64,
    pub retries_per_relay: u32,
    pub detail_timeout_ms: u64,
    pub detail_retries_per_relay: u32,
    pub retry_delay_ms: u64,
    pub detail_concurrency_limit: usize,
    pub primary: SourceConfig,
    pub supplement: SourceConfig,
    pub placeholder_logo_base: String,
    pub matcher: MatcherConfig,
    pub fallback: Vec<FallbackEntry>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            relays: default_relays(),
            timeout_ms: 12_000,
            retries_per_relay: 3,
            detail_timeout_ms: 10_000,
            detail_retries_per_relay: 2,
            retry_delay_ms: 500,
            detail_concurrency_limit: 6,
            primary: SourceConfig::new(PRIMARY_ID, "https://primary.example.com/schedule"),
            supplement: SourceConfig::new(SUPPLEMENT_ID, "https://supplement.example.com/schedule"),
            placeholder_logo_base: DEFAULT_PLACEHOLDER_LOGO_BASE.to_string(),
            matcher: MatcherConfig::default(),
            fallback: default_seed(),
        }
    }
}

/// One upstream listing page and how to read it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SourceConfig {
    pub id: String,
    pub listing_url: String,
    /// Strategy names in priority order; empty means the default chain.
    pub strategies: Vec<String>,
    /// Fetch detail pages for artwork and kickoff.
    pub enrich: bool,
}

impl SourceConfig {
    pub fn new(id: &str, listing_url: &str) -> Self {
        Self {
            id: id.to_string(),
            listing_url: listing_url.to_string(),
            strategies: Vec::new(),
            enrich: true,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatcherKind {
    #[default]
    Heuristic,
    Similarity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MatcherConfig {
    pub kind: MatcherKind,
    pub aliases: AliasTable,
    pub similarity_threshold: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            kind: MatcherKind::Heuristic,
            aliases: AliasTable::default(),
            similarity_threshold: 0.92,
        }
    }
}

impl MatcherConfig {
    pub fn build(&self) -> Arc<dyn TeamNameMatcher> {
        let base = HeuristicMatcher::with_aliases(&self.aliases);
        match self.kind {
            MatcherKind::Heuristic => Arc::new(base),
            MatcherKind::Similarity => {
                Arc::new(SimilarityMatcher::new(base, self.similarity_threshold))
            }
        }
    }
}

impl FeedConfig {
    pub fn listing_policy(&self) -> FetchPolicy {
        FetchPolicy::new(self.timeout_ms, self.retries_per_relay, self.retry_delay_ms)
    }

    pub fn detail_policy(&self) -> FetchPolicy {
        FetchPolicy::new(
            self.detail_timeout_ms,
            self.detail_retries_per_relay,
            self.retry_delay_ms,
        )
    }

    /// Apply `FEED_*` overrides. Unparseable values are logged and skipped.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<u64>(ENV_TIMEOUT_MS) {
            self.timeout_ms = v;
        }
        if let Some(v) = env_parse::<u32>(ENV_RETRIES) {
            self.retries_per_relay = v;
        }
        if let Some(v) = env_parse::<usize>(ENV_CONCURRENCY) {
            self.detail_concurrency_limit = v;
        }
        if let Ok(raw) = std::env::var(ENV_RELAYS) {
            let relays: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if relays.is_empty() {
                warn!(key = ENV_RELAYS, value = %raw, "ignoring empty relay override");
            } else {
                self.relays = relays;
            }
        }
    }

    /// Checks that must hold before an aggregator can be built from this config.
    pub fn validate(&self) -> std::result::Result<(), AggregationError> {
        if self.relays.is_empty() {
            return Err(AggregationError::NoRelays);
        }
        for src in [&self.primary, &self.supplement] {
            url::Url::parse(&src.listing_url).map_err(|e| AggregationError::InvalidUrl {
                url: src.listing_url.clone(),
                reason: e.to_string(),
            })?;
        }
        if self.primary.id == self.supplement.id {
            return Err(AggregationError::Config(format!(
                "primary and supplement share the id '{}'",
                self.primary.id
            )));
        }
        if let Some(e) = self
            .fallback
            .iter()
            .find(|e| e.offset_minutes.unsigned_abs() > MAX_FALLBACK_OFFSET_MINUTES as u64)
        {
            return Err(AggregationError::Config(format!(
                "fallback {} vs {}: offset_minutes {} exceeds {}",
                e.home, e.away, e.offset_minutes, MAX_FALLBACK_OFFSET_MINUTES
            )));
        }
        Ok(())
    }

    /// Partially specified source tables lose their id to serde defaults.
    fn fill_source_ids(&mut self) {
        if self.primary.id.trim().is_empty() {
            self.primary.id = PRIMARY_ID.to_string();
        }
        if self.supplement.id.trim().is_empty() {
            self.supplement.id = SUPPLEMENT_ID.to_string();
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring invalid env override");
            None
        }
    }
}

/// Load config from an explicit path. Supports TOML or JSON formats.
pub fn load_config_from(path: &Path) -> Result<FeedConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading feed config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing feed config {}", path.display()))
}

/// Load config using env var + fallbacks, then apply env overrides:
/// 1) $FEED_CONFIG_PATH
/// 2) config/feed.toml
/// 3) config/feed.json
/// 4) built-in defaults
pub fn load_config_default() -> Result<FeedConfig> {
    let mut cfg = locate_and_load()?;
    cfg.apply_env_overrides();
    Ok(cfg)
}

fn locate_and_load() -> Result<FeedConfig> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(&p);
        if pb.exists() {
            return load_config_from(&pb);
        }
        return Err(anyhow!("{ENV_PATH} points to non-existent path {p}"));
    }
    let toml_p = PathBuf::from("config/feed.toml");
    if toml_p.exists() {
        return load_config_from(&toml_p);
    }
    let json_p = PathBuf::from("config/feed.json");
    if json_p.exists() {
        return load_config_from(&json_p);
    }
    Ok(FeedConfig::default())
}

fn parse_config(s: &str, hint_ext: &str) -> Result<FeedConfig> {
    let looks_json = s.trim_start().starts_with('{');
    let try_toml_first = hint_ext == "toml" || (hint_ext != "json" && !looks_json);

    let parsed = if try_toml_first {
        toml::from_str::<FeedConfig>(s)
            .map_err(anyhow::Error::from)
            .or_else(|toml_err| {
                serde_json::from_str::<FeedConfig>(s)
                    .map_err(|_| toml_err.context("unsupported feed config format"))
            })
    } else {
        serde_json::from_str::<FeedConfig>(s)
            .map_err(anyhow::Error::from)
            .or_else(|json_err| {
                toml::from_str::<FeedConfig>(s)
                    .map_err(|_| json_err.context("unsupported feed config format"))
            })
    };

    let mut cfg = parsed?;
    cfg.fill_source_ids();
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    fn clear_env() {
        for k in [ENV_PATH, ENV_TIMEOUT_MS, ENV_RETRIES, ENV_CONCURRENCY, ENV_RELAYS] {
            env::remove_var(k);
        }
    }

    #[test]
    fn toml_partial_tables_keep_defaults() {
        let s = r#"
relays = ["direct", "https://relay.test/?url="]
retries_per_relay = 2

[primary]
listing_url = "https://a.test/list"

[matcher]
kind = "similarity"

[matcher.aliases]
"sporting cp" = ["scp", "sporting lisbon"]
"#;
        let cfg = parse_config(s, "toml").unwrap();
        assert_eq!(cfg.relays.len(), 2);
        assert_eq!(cfg.retries_per_relay, 2);
        assert_eq!(cfg.timeout_ms, 12_000);
        assert_eq!(cfg.primary.id, PRIMARY_ID);
        assert_eq!(cfg.primary.listing_url, "https://a.test/list");
        assert!(cfg.primary.enrich);
        assert_eq!(cfg.supplement.id, SUPPLEMENT_ID);
        assert_eq!(cfg.matcher.kind, MatcherKind::Similarity);
        assert_eq!(cfg.matcher.build().name(), "similarity");
        assert!(cfg.matcher.build().matches("SCP", "Sporting Lisbon"));
        assert_eq!(cfg.fallback.len(), 4);
    }

    #[test]
    fn json_is_sniffed_without_extension() {
        let s = r#"{ "detail_concurrency_limit": 3, "fallback": [] }"#;
        let cfg = parse_config(s, "").unwrap();
        assert_eq!(cfg.detail_concurrency_limit, 3);
        assert!(cfg.fallback.is_empty());
        assert!(parse_config("relays = 7", "toml").is_err());
    }

    #[test]
    fn policies_follow_fields() {
        let cfg = FeedConfig::default();
        let l = cfg.listing_policy();
        assert_eq!(l.timeout.as_millis(), 12_000);
        assert_eq!(l.attempts_per_relay, 3);
        let d = cfg.detail_policy();
        assert_eq!(d.timeout.as_millis(), 10_000);
        assert_eq!(d.attempts_per_relay, 2);
        assert_eq!(d.retry_delay.as_millis(), 500);
    }

    #[test]
    fn validate_rejects_unusable_configs() {
        assert!(FeedConfig::default().validate().is_ok());

        let mut c = FeedConfig::default();
        c.relays.clear();
        assert_eq!(c.validate(), Err(AggregationError::NoRelays));

        let mut c = FeedConfig::default();
        c.supplement.listing_url = "not a url".into();
        assert!(matches!(c.validate(), Err(AggregationError::InvalidUrl { .. })));

        let mut c = FeedConfig::default();
        c.supplement.id = PRIMARY_ID.into();
        assert!(matches!(c.validate(), Err(AggregationError::Config(_))));

        let mut c = FeedConfig::default();
        c.fallback.push(FallbackEntry::new("Ajax", "PSV", 1_000_000_000_000));
        let err = c.validate().unwrap_err();
        assert!(err.to_string().contains("offset_minutes"), "got {err}");

        let mut c = FeedConfig::default();
        c.fallback = vec![
            FallbackEntry::new("Ajax", "PSV", MAX_FALLBACK_OFFSET_MINUTES),
            FallbackEntry::new("Porto", "Benfica", -MAX_FALLBACK_OFFSET_MINUTES),
        ];
        assert!(c.validate().is_ok());
    }

    #[serial_test::serial]
    #[test]
    fn env_overrides_apply_and_bad_values_are_ignored() {
        clear_env();
        env::set_var(ENV_TIMEOUT_MS, "2500");
        env::set_var(ENV_RETRIES, "many");
        env::set_var(ENV_RELAYS, " direct , https://r.test/?url= ,");
        let mut cfg = FeedConfig::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.timeout_ms, 2500);
        assert_eq!(cfg.retries_per_relay, 3);
        assert_eq!(cfg.relays, vec!["direct", "https://r.test/?url="]);
        clear_env();
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        clear_env();

        // nothing on disk
        assert_eq!(load_config_default().unwrap(), FeedConfig::default());

        // config/feed.json picked up
        fs::create_dir_all(tmp.path().join("config")).unwrap();
        fs::write(
            tmp.path().join("config/feed.json"),
            r#"{ "retry_delay_ms": 50 }"#,
        )
        .unwrap();
        assert_eq!(load_config_default().unwrap().retry_delay_ms, 50);

        // env path wins
        let p = tmp.path().join("custom.toml");
        fs::write(&p, "retry_delay_ms = 7\n").unwrap();
        env::set_var(ENV_PATH, p.display().to_string());
        assert_eq!(load_config_default().unwrap().retry_delay_ms, 7);

        // and must exist
        env::set_var(ENV_PATH, tmp.path().join("missing.toml").display().to_string());
        assert!(load_config_default().is_err());

        clear_env();
        env::set_current_dir(&old).unwrap();
    }
}
