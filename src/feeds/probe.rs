// src/feeds/probe.rs

//! Feed reachability probing
//!
//! A probe issues a GET against the feed with a deadline. Deadline expiry
//! doubles the deadline and retries; any other failure ends the probe at
//! once with the caller's verdict for non-timeout errors.

use crate::config::ProbeSettings;
use crate::error::Result;
use crate::proxy::ProxyDescriptor;
use reqwest::blocking::Client;
use std::io;
use std::time::Duration;
use tracing::{info, warn};

/// Why a single probe attempt failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    /// The attempt's deadline expired
    TimedOut,
    /// Connection refused, DNS, TLS, HTTP status or protocol error
    Failed(String),
}

/// Issues one request against a feed within a deadline
pub trait FeedRequester: Send + Sync {
    fn request(&self, feed: &str, timeout: Duration) -> std::result::Result<(), ProbeFailure>;
}

/// Probes feeds over HTTP, optionally through a proxy
pub struct HttpFeedRequester {
    client: Client,
}

impl HttpFeedRequester {
    pub fn new(proxy: Option<&ProxyDescriptor>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(proxy) = proxy {
            builder = proxy.configure(builder)?;
        }
        let client = builder.build()?;
        Ok(Self { client })
    }
}

fn classify(error: reqwest::Error) -> ProbeFailure {
    if error.is_timeout() {
        ProbeFailure::TimedOut
    } else {
        ProbeFailure::Failed(error.to_string())
    }
}

impl FeedRequester for HttpFeedRequester {
    fn request(&self, feed: &str, timeout: Duration) -> std::result::Result<(), ProbeFailure> {
        let mut response = self
            .client
            .get(feed)
            .timeout(timeout)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(classify)?;

        // The deadline covers reading the whole body, not just the headers
        response.copy_to(&mut io::sink()).map_err(classify)?;
        Ok(())
    }
}

/// Decides whether feeds respond in time
pub struct FeedProber {
    requester: Box<dyn FeedRequester>,
}

impl FeedProber {
    pub fn new(requester: Box<dyn FeedRequester>) -> Self {
        Self { requester }
    }

    /// Prober backed by a real HTTP client
    pub fn http(proxy: Option<&ProxyDescriptor>) -> Result<Self> {
        Ok(Self::new(Box::new(HttpFeedRequester::new(proxy)?)))
    }

    /// Check whether `feed` answers within the backoff schedule
    ///
    /// Attempt `k` runs with a deadline of `initial_timeout * 2^(k-1)`.
    /// Non-timeout failures return `allow_errors` without retrying.
    pub fn is_reachable(&self, feed: &str, settings: ProbeSettings, allow_errors: bool) -> bool {
        info!("Checking if NuGet feed '{}' is reachable...", feed);

        let mut timeout = settings.initial_timeout;
        for _ in 0..settings.try_count {
            match self.requester.request(feed, timeout) {
                Ok(()) => {
                    info!("Querying NuGet feed '{}' succeeded.", feed);
                    return true;
                }
                Err(ProbeFailure::TimedOut) => {
                    info!(
                        "Didn't receive answer from NuGet feed '{}' in {}ms.",
                        feed,
                        timeout.as_millis()
                    );
                    timeout = timeout.saturating_mul(2);
                }
                Err(ProbeFailure::Failed(reason)) => {
                    let verdict = if allow_errors { "Considering" } else { "Not considering" };
                    info!(
                        "Querying NuGet feed '{}' failed in a timely manner. {} the feed for use. The reason for the failure: {}",
                        feed, verdict, reason
                    );
                    return allow_errors;
                }
            }
        }

        warn!(
            "Didn't receive answer from NuGet feed '{}'. Tried it {} times.",
            feed, settings.try_count
        );
        false
    }
}
