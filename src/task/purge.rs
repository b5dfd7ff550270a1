//! Purge executor.
//!
//! # Data Flow
//! ```text
//! {"meta": {"uri", "dt"}}
//!     → staleness check (dt + expiry < now → skip)
//!     → expand_requests (entries × templates × variants)
//!     → dedup by URL
//!     → concurrent dispatch (HTTP or Cloudflare), join all
//! ```
//!
//! # Design Decisions
//! - Individual request failures are logged, never retried or escalated
//! - Only a malformed message fails `execute`
//! - A URL already qualified by a variant is not purged per variant again

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Deserialize;
use url::{Position, Url};

use crate::config::{PurgeConfig, PurgeEntryConfig};
use crate::observability::metrics;
use crate::task::cloudflare::CloudflareClient;
use crate::task::{Executor, TaskError, CLOUDFLARE_METHOD};

const URL_PLACEHOLDER: &str = "#url#";
const VARIANT_PLACEHOLDER: &str = "#variants#";

#[derive(Debug, Deserialize)]
struct PurgeEvent {
    meta: PurgeMeta,
}

#[derive(Debug, Deserialize)]
struct PurgeMeta {
    uri: String,
    dt: DateTime<Utc>,
}

/// One generated purge request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
}

/// Parts of the event URL the expansion looks at.
struct EventUrl<'a> {
    host: String,
    /// Path plus query, substituted for `#url#`.
    request_uri: &'a str,
    last_query: &'a str,
    first_segment: &'a str,
}

impl<'a> EventUrl<'a> {
    fn new(url: &'a Url) -> Self {
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        };
        Self {
            host,
            request_uri: &url[Position::BeforePath..Position::AfterQuery],
            last_query: url
                .query()
                .and_then(|q| q.rsplit('&').next())
                .unwrap_or(""),
            first_segment: url
                .path_segments()
                .and_then(|mut segments| segments.next())
                .unwrap_or(""),
        }
    }

    /// Whether the URL already names one of `variants`, either as its last
    /// query parameter (whole `k=v` pair or its value) or its first path
    /// segment.
    fn is_variant_qualified(&self, variants: &[&str]) -> bool {
        let known = |token: &str| !token.is_empty() && variants.contains(&token);
        let query_value = self
            .last_query
            .split_once('=')
            .map(|(_, value)| value)
            .unwrap_or("");
        known(self.last_query) || known(query_value) || known(self.first_segment)
    }
}

fn render(template: &str, request_uri: &str, variant: &str) -> String {
    template
        .replace(URL_PLACEHOLDER, request_uri)
        .replace(VARIANT_PLACEHOLDER, variant)
}

/// Generate the purge requests for `url`, deduplicated by resulting URL.
pub fn expand_requests(entries: &[PurgeEntryConfig], url: &Url) -> Vec<RequestOptions> {
    let event = EventUrl::new(url);
    let mut requests = Vec::new();

    for entry in entries.iter().filter(|e| e.host == event.host) {
        // The implicit empty variant always comes first.
        let mut variants: Vec<&str> = vec![""];
        for variant in &entry.variants {
            if !variants.contains(&variant.as_str()) {
                variants.push(variant);
            }
        }
        let qualified = event.is_variant_qualified(&variants);

        let request = |url: String| RequestOptions {
            method: entry.method.clone(),
            url,
            headers: entry.headers.clone(),
        };

        for template in &entry.uris {
            for variant in &variants {
                if !variant.is_empty() && qualified {
                    continue;
                }
                requests.push(request(render(template, event.request_uri, variant)));

                if event.first_segment == "wiki" && !variant.is_empty() {
                    let aliased = render(template, event.request_uri, "")
                        .replace("/wiki/", &format!("/{variant}/"));
                    requests.push(request(aliased));
                }
            }
        }
    }

    dedup_by_url(requests)
}

fn dedup_by_url(requests: Vec<RequestOptions>) -> Vec<RequestOptions> {
    let mut seen = HashSet::new();
    requests
        .into_iter()
        .filter(|r| seen.insert(r.url.clone()))
        .collect()
}

pub struct PurgeExecutor {
    expiry: Duration,
    entries: Vec<PurgeEntryConfig>,
    client: reqwest::Client,
    cloudflare: CloudflareClient,
}

impl PurgeExecutor {
    pub fn new(config: &PurgeConfig) -> Result<Self, TaskError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TaskError::Config(e.to_string()))?;

        if config.cf_token.is_none()
            && config
                .entries
                .iter()
                .any(|e| e.method.eq_ignore_ascii_case(CLOUDFLARE_METHOD))
        {
            tracing::warn!("Cloudflare purge entries configured without purge.cf_token");
        }

        let cloudflare = CloudflareClient::new(
            client.clone(),
            &config.cf_api_base,
            config.cf_token.clone(),
            &config.cf_zone_id,
        );

        Ok(Self {
            expiry: Duration::from_millis(config.expiry_ms),
            entries: config.entries.clone(),
            client,
            cloudflare,
        })
    }

    fn is_stale(&self, dt: DateTime<Utc>) -> bool {
        // An expiry past the representable range never expires.
        chrono::Duration::from_std(self.expiry)
            .ok()
            .and_then(|expiry| dt.checked_add_signed(expiry))
            .is_some_and(|deadline| Utc::now() > deadline)
    }

    /// Send every request concurrently and wait for all of them.
    /// Returns how many requests were dispatched.
    pub async fn purge(&self, url: &Url) -> usize {
        let requests = expand_requests(&self.entries, url);
        join_all(requests.iter().map(|r| self.dispatch(r))).await;
        requests.len()
    }

    async fn dispatch(&self, request: &RequestOptions) {
        if request.method.eq_ignore_ascii_case(CLOUDFLARE_METHOD) {
            match self.cloudflare.purge_files(std::slice::from_ref(&request.url)).await {
                Ok(()) => {
                    metrics::record_purge_request("success");
                    tracing::info!(url = %request.url, "Cloudflare purge success");
                }
                Err(e) => {
                    metrics::record_purge_request("failure");
                    tracing::warn!(url = %request.url, error = %e, "Failed to purge cloudflare cache");
                }
            }
            return;
        }

        let method = match reqwest::Method::from_bytes(request.method.as_bytes()) {
            Ok(method) => method,
            Err(e) => {
                metrics::record_purge_request("failure");
                tracing::warn!(url = %request.url, method = %request.method, error = %e, "Invalid purge method");
                return;
            }
        };

        // A `Host` entry in the headers replaces the URL's host on the wire.
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        match builder.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    metrics::record_purge_request("success");
                    tracing::info!(url = %request.url, "Purge success");
                } else if status == reqwest::StatusCode::NOT_FOUND {
                    metrics::record_purge_request("not_found");
                } else {
                    metrics::record_purge_request("failure");
                    tracing::warn!(url = %request.url, status = status.as_u16(), "Failed to send purge request");
                }
            }
            Err(e) => {
                metrics::record_purge_request("failure");
                tracing::warn!(url = %request.url, error = %e, "Failed to send purge request");
            }
        }
    }
}

#[async_trait]
impl Executor for PurgeExecutor {
    async fn execute(&self, message: &[u8]) -> Result<(), TaskError> {
        let event: PurgeEvent = serde_json::from_slice(message)?;

        if self.is_stale(event.meta.dt) {
            tracing::info!(url = %event.meta.uri, "Skip purge of expired event");
            return Ok(());
        }

        let url = Url::parse(&event.meta.uri)?;
        let dispatched = self.purge(&url).await;
        tracing::debug!(url = %event.meta.uri, dispatched, "Purge requests finished");
        Ok(())
    }
}
