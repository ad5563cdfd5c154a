// src/ingest/relay.rs
//! Relay-chained fetching.
//!
//! Upstream pages block direct cross-origin access, so every fetch goes through an
//! ordered list of relay templates. Relays are tried in order, each with a bounded
//! number of attempts, a fixed inter-attempt delay, and a per-attempt timeout.
//! The first 2xx response wins. No relay health is remembered between calls.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use tracing::{debug, warn};

use crate::error::{AggregationError, Result};

/// How a relay endpoint wraps the target URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayTemplate {
    /// Fetch the target itself.
    Direct,
    /// `prefix + target`, target left as is.
    Append(String),
    /// `prefix + percent-encoded target` (templates ending in `=` or `?`).
    Encode(String),
    /// Template with a `{url}` placeholder, replaced by the encoded target.
    Substitute(String),
}

impl RelayTemplate {
    pub fn parse(raw: &str) -> Self {
        let t = raw.trim();
        if t.is_empty() || t.eq_ignore_ascii_case("direct") {
            Self::Direct
        } else if t.contains("{url}") {
            Self::Substitute(t.to_string())
        } else if t.ends_with('=') || t.ends_with('?') {
            Self::Encode(t.to_string())
        } else {
            Self::Append(t.to_string())
        }
    }

    /// Concrete URL to request for `target` through this relay.
    pub fn build(&self, target: &str) -> String {
        match self {
            Self::Direct => target.to_string(),
            Self::Append(prefix) => format!("{prefix}{target}"),
            Self::Encode(prefix) => format!("{prefix}{}", encode_component(target)),
            Self::Substitute(tpl) => tpl.replace("{url}", &encode_component(target)),
        }
    }

    /// Short name for logs.
    pub fn label(&self) -> &str {
        match self {
            Self::Direct => "direct",
            Self::Append(p) | Self::Encode(p) | Self::Substitute(p) => p.as_str(),
        }
    }
}

fn encode_component(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Minimal response view the relay client needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One HTTP GET. Implementations must not retry on their own.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> anyhow::Result<HttpResponse>;
}

/// Production transport backed by `reqwest`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(
                "live-feed-aggregator/",
                env!("CARGO_PKG_VERSION"),
                " (+github.com/lumlich/live-feed-aggregator)"
            ))
            .connect_timeout(Duration::from_secs(4))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str) -> anyhow::Result<HttpResponse> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(HttpResponse { status, body })
    }
}

/// Retry/timeout policy for one class of fetches (listing or detail).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    pub timeout: Duration,
    pub attempts_per_relay: u32,
    pub retry_delay: Duration,
}

impl FetchPolicy {
    pub fn new(timeout_ms: u64, attempts_per_relay: u32, retry_delay_ms: u64) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms),
            attempts_per_relay,
            retry_delay: Duration::from_millis(retry_delay_ms),
        }
    }

    fn attempts(&self) -> u32 {
        self.attempts_per_relay.max(1)
    }
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self::new(12_000, 3, 500)
    }
}

#[derive(Clone)]
pub struct RelayFetchClient {
    transport: Arc<dyn Transport>,
    relays: Vec<RelayTemplate>,
}

impl RelayFetchClient {
    pub fn new(transport: Arc<dyn Transport>, relays: Vec<RelayTemplate>) -> Self {
        Self { transport, relays }
    }

    pub fn from_templates<S: AsRef<str>>(transport: Arc<dyn Transport>, templates: &[S]) -> Self {
        let relays = templates
            .iter()
            .map(|t| RelayTemplate::parse(t.as_ref()))
            .collect();
        Self::new(transport, relays)
    }

    pub fn relays(&self) -> &[RelayTemplate] {
        &self.relays
    }

    /// Fetch `target` through the relay chain and return the body of the first 2xx reply.
    pub async fn fetch(&self, target: &str, policy: &FetchPolicy) -> Result<String> {
        if self.relays.is_empty() {
            return Err(AggregationError::NoRelays);
        }

        let mut total_attempts = 0usize;
        for relay in &self.relays {
            let url = relay.build(target);
            let attempts = policy.attempts();

            for attempt in 1..=attempts {
                total_attempts += 1;
                counter!("relay_attempts_total").increment(1);

                match tokio::time::timeout(policy.timeout, self.transport.get(&url)).await {
                    Ok(Ok(resp)) if resp.is_success() => {
                        debug!(relay = relay.label(), attempt, target, "relay fetch ok");
                        return Ok(resp.body);
                    }
                    Ok(Ok(resp)) => {
                        warn!(
                            relay = relay.label(),
                            attempt,
                            status = resp.status,
                            target,
                            "relay attempt got non-success status"
                        );
                    }
                    Ok(Err(e)) => {
                        warn!(relay = relay.label(), attempt, target, error = ?e, "relay attempt failed");
                    }
                    Err(_) => {
                        warn!(
                            relay = relay.label(),
                            attempt,
                            target,
                            timeout_ms = policy.timeout.as_millis() as u64,
                            "relay attempt timed out"
                        );
                    }
                }
                counter!("relay_attempt_failures_total").increment(1);

                if attempt < attempts {
                    tokio::time::sleep(policy.retry_delay).await;
                }
            }
        }

        counter!("relay_exhausted_total").increment(1);
        Err(AggregationError::RelayExhausted {
            url: target.to_string(),
            relays: self.relays.len(),
            attempts: total_attempts,
        })
    }
}

// --- Test helper ---

/// What a [`MockTransport`] route answers with.
#[derive(Debug, Clone)]
pub enum MockReply {
    Body(String),
    Status(u16),
    Error,
    /// Never resolves; only a timeout ends the attempt.
    Hang,
}

/// Scripted transport: the first route whose prefix matches the requested URL answers.
/// Unmatched URLs get a 404. Every requested URL is recorded.
pub struct MockTransport {
    routes: Vec<(String, MockReply, Duration)>,
    pub calls: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            calls: Mutex::new(vec![]),
        }
    }

    pub fn route(self, prefix: impl Into<String>, reply: MockReply) -> Self {
        self.route_delayed(prefix, reply, Duration::ZERO)
    }

    pub fn route_delayed(
        mut self,
        prefix: impl Into<String>,
        reply: MockReply,
        delay: Duration,
    ) -> Self {
        self.routes.push((prefix.into(), reply, delay));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_with_prefix(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, url: &str) -> anyhow::Result<HttpResponse> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(url.to_string());
        }
        let hit = self
            .routes
            .iter()
            .find(|(prefix, _, _)| url.starts_with(prefix.as_str()))
            .map(|(_, reply, delay)| (reply.clone(), *delay));

        let Some((reply, delay)) = hit else {
            return Ok(HttpResponse {
                status: 404,
                body: String::new(),
            });
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match reply {
            MockReply::Body(body) => Ok(HttpResponse { status: 200, body }),
            MockReply::Status(status) => Ok(HttpResponse {
                status,
                body: String::new(),
            }),
            MockReply::Error => Err(anyhow::anyhow!("connection refused (mock)")),
            MockReply::Hang => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_forms_are_detected() {
        assert_eq!(RelayTemplate::parse(""), RelayTemplate::Direct);
        assert_eq!(RelayTemplate::parse("direct"), RelayTemplate::Direct);
        assert!(matches!(
            RelayTemplate::parse("https://api.allorigins.win/raw?url="),
            RelayTemplate::Encode(_)
        ));
        assert!(matches!(
            RelayTemplate::parse("https://corsproxy.io/?"),
            RelayTemplate::Encode(_)
        ));
        assert!(matches!(
            RelayTemplate::parse("https://yacdn.org/proxy/"),
            RelayTemplate::Append(_)
        ));
        assert!(matches!(
            RelayTemplate::parse("https://relay.test/get?u={url}&raw=1"),
            RelayTemplate::Substitute(_)
        ));
    }

    #[test]
    fn build_encodes_or_appends() {
        let target = "https://a.test/list?x=1";
        assert_eq!(RelayTemplate::Direct.build(target), target);
        assert_eq!(
            RelayTemplate::parse("https://r.test/fetch/").build(target),
            "https://r.test/fetch/https://a.test/list?x=1"
        );
        assert_eq!(
            RelayTemplate::parse("https://r.test/raw?url=").build(target),
            "https://r.test/raw?url=https%3A%2F%2Fa.test%2Flist%3Fx%3D1"
        );
        assert_eq!(
            RelayTemplate::parse("https://r.test/get?u={url}&raw=1").build(target),
            "https://r.test/get?u=https%3A%2F%2Fa.test%2Flist%3Fx%3D1&raw=1"
        );
    }

    #[tokio::test]
    async fn empty_relay_list_is_an_error() {
        let client = RelayFetchClient::new(Arc::new(MockTransport::new()), vec![]);
        let err = client
            .fetch("https://a.test/", &FetchPolicy::default())
            .await
            .unwrap_err();
        assert_eq!(err, AggregationError::NoRelays);
        assert!(err.is_exhaustion());
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_attempt_is_cut_by_timeout() {
        let transport = Arc::new(
            MockTransport::new()
                .route("https://slow.test/", MockReply::Hang)
                .route("https://fast.test/", MockReply::Body("ok".into())),
        );
        let client = RelayFetchClient::from_templates(
            transport.clone(),
            &["https://slow.test/", "https://fast.test/"],
        );
        let policy = FetchPolicy::new(1_000, 1, 500);
        let body = client.fetch("https://a.test/", &policy).await.unwrap();
        assert_eq!(body, "ok");
        assert_eq!(transport.calls_with_prefix("https://slow.test/"), 1);
    }
}
