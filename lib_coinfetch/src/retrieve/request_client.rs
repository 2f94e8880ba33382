//! # Request Client
//!
//! One `RequestClient` is created per process and handed by reference to
//! every tool that needs network access. It owns the pooled session, the
//! default headers and the retry policies.
//!
//! ## Request flow:
//! 1. GET through the middleware stack (see [`super::transport`]); connection
//!    failures and 502/503/504 are retried there with exponential backoff.
//! 2. On HTTP 429, wait `Retry-After` + 1 seconds with a console countdown
//!    and start over, within the [`RateLimitPolicy`] budget.
//! 3. File downloads return the raw response at this point.
//! 4. JSON requests are decoded and normalized into an [`Envelope`].
//!
//! Only HTTP-status failures become envelopes. Connection failures that
//! outlive the transport retries come back as [`FetchError::Transport`].

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::countdown::{countdown, retry_after_secs};
use super::envelope::Envelope;
use super::transport::{build_session, TransportOptions};

/// Errors that escape [`RequestClient::fetch`].
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URL could not be parsed.
    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// A default header name or value was rejected.
    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    /// Connection-level failure that survived the transport retries.
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest_middleware::Error,
    },

    /// The response body could not be read.
    #[error("failed to read response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// HTTP 429 without a usable `Retry-After` header.
    #[error("rate limited by {url} without a Retry-After header")]
    RateLimited { url: String },

    /// The rate-limit budget ran out before the server let the request through.
    #[error("gave up on {url} after {waits} rate-limit waits ({waited:?} in total)")]
    GaveUpWaiting {
        url: String,
        waits: u32,
        waited: Duration,
    },
}

/// Result of [`RequestClient::fetch`].
#[derive(Debug)]
pub enum Fetched {
    /// Decoded and normalized JSON response.
    Json(Envelope),
    /// Raw response of a file download, body not yet consumed.
    File(reqwest::Response),
}

/// Budget for waiting out HTTP 429 responses.
///
/// `None` removes the corresponding bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Maximum number of waits per request.
    pub max_waits: Option<u32>,
    /// Maximum accumulated waiting time per request.
    pub max_total_wait: Option<Duration>,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_waits: Some(10),
            max_total_wait: Some(Duration::from_secs(15 * 60)),
        }
    }
}

impl RateLimitPolicy {
    /// Keeps waiting for as long as the server keeps answering 429.
    pub fn unbounded() -> Self {
        Self {
            max_waits: None,
            max_total_wait: None,
        }
    }

    fn allows(&self, state: &RetryState, next_wait: Duration) -> bool {
        let waits_ok = self.max_waits.map_or(true, |max| state.waits < max);
        // An overflowing total is over any budget
        let time_ok = self.max_total_wait.map_or(true, |max| {
            state
                .waited
                .checked_add(next_wait)
                .is_some_and(|total| total <= max)
        });
        waits_ok && time_ok
    }
}

/// Counters for a single `fetch` call.
#[derive(Debug, Default, Clone, Copy)]
struct RetryState {
    attempts: u32,
    waits: u32,
    waited: Duration,
}

/// Resilient HTTP client shared by all coinfetch tools.
pub struct RequestClient {
    /// Pooled session wrapped in the transport retry middleware.
    session: ClientWithMiddleware,
    /// Headers sent with every request.
    default_headers: HeaderMap,
    /// Budget for HTTP 429 waits.
    rate_limit: RateLimitPolicy,
}

impl RequestClient {
    /// Creates a client with the default transport options
    /// (120 s timeout, 5 retries on 502/503/504) and rate-limit budget.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_options(&TransportOptions::default(), RateLimitPolicy::default())
    }

    /// Creates a client with explicit transport options and rate-limit budget.
    pub fn with_options(
        transport: &TransportOptions,
        rate_limit: RateLimitPolicy,
    ) -> Result<Self, FetchError> {
        let session = build_session(transport).map_err(FetchError::Build)?;
        Ok(Self {
            session,
            default_headers: HeaderMap::new(),
            rate_limit,
        })
    }

    /// Merges `headers` into the headers sent with every request.
    ///
    /// A name already present is replaced. Nothing is changed when any pair
    /// is invalid.
    pub fn set_default_headers<I, K, V>(&mut self, headers: I) -> Result<(), FetchError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut parsed = HeaderMap::new();
        for (name, value) in headers {
            let (name, value) = (name.as_ref(), value.as_ref());
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| FetchError::InvalidHeader {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| FetchError::InvalidHeader {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
            parsed.insert(header_name, header_value);
        }

        for (name, value) in parsed.iter() {
            self.default_headers.insert(name.clone(), value.clone());
        }
        Ok(())
    }

    /// Headers currently sent with every request.
    pub fn default_headers(&self) -> &HeaderMap {
        &self.default_headers
    }

    /// GETs `url` and returns either a normalized envelope or, when
    /// `is_file_download` is set, the raw response.
    pub async fn fetch(&self, url: &str, is_file_download: bool) -> Result<Fetched, FetchError> {
        if is_file_download {
            self.download(url).await.map(Fetched::File)
        } else {
            self.fetch_json(url).await.map(Fetched::Json)
        }
    }

    /// GETs `url` and normalizes the JSON answer into an [`Envelope`].
    pub async fn fetch_json(&self, url: &str) -> Result<Envelope, FetchError> {
        let parsed = parse_url(url)?;
        let response = self.send_respecting_rate_limit(&parsed).await?;

        let status = response.status();
        // Capture the status check before the body consumes the response
        let http_error = response.error_for_status_ref().err().map(|e| e.to_string());
        let bytes = response.bytes().await.map_err(|source| FetchError::Body {
            url: url.to_string(),
            source,
        })?;

        let body = Envelope::decode_body(&bytes);
        if let Some(message) = &http_error {
            warn!(url = %parsed, status = status.as_u16(), "{message}");
        }
        Ok(Envelope::from_parts(status, http_error, body))
    }

    /// GETs `url` for a file download. The body is left unread so callers
    /// can stream it.
    pub async fn download(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let parsed = parse_url(url)?;
        self.send_respecting_rate_limit(&parsed).await
    }

    /// Sends the GET until the server stops answering 429.
    async fn send_respecting_rate_limit(&self, url: &Url) -> Result<reqwest::Response, FetchError> {
        let mut state = RetryState::default();

        loop {
            state.attempts += 1;
            debug!(url = %url, attempt = state.attempts, "GET");

            let response = self
                .session
                .get(url.clone())
                .headers(self.default_headers.clone())
                .send()
                .await
                .map_err(|source| FetchError::Transport {
                    url: url.to_string(),
                    source,
                })?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                debug!(
                    url = %url,
                    status = response.status().as_u16(),
                    attempts = state.attempts,
                    waited_secs = state.waited.as_secs(),
                    "response received"
                );
                return Ok(response);
            }

            let Some(retry_after) = retry_after_secs(response.headers()) else {
                warn!(url = %url, headers = ?response.headers(), "HTTP 429 without Retry-After");
                return Err(FetchError::RateLimited {
                    url: url.to_string(),
                });
            };

            let wait_secs = retry_after.saturating_add(1);
            let wait = Duration::from_secs(wait_secs);
            if !self.rate_limit.allows(&state, wait) {
                warn!(url = %url, waits = state.waits, "rate-limit budget exhausted");
                return Err(FetchError::GaveUpWaiting {
                    url: url.to_string(),
                    waits: state.waits,
                    waited: state.waited,
                });
            }

            warn!(url = %url, retry_after, "rate limited; waiting {wait_secs} s");
            countdown(wait_secs).await;
            state.waits += 1;
            state.waited = state.waited.saturating_add(wait);
        }
    }
}

fn parse_url(url: &str) -> Result<Url, FetchError> {
    Url::parse(url).map_err(|source| FetchError::InvalidUrl {
        url: url.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_bounded() {
        let policy = RateLimitPolicy::default();
        let state = RetryState::default();
        assert!(policy.allows(&state, Duration::from_secs(3)));

        let spent = RetryState {
            attempts: 11,
            waits: 10,
            waited: Duration::from_secs(30),
        };
        assert!(!policy.allows(&spent, Duration::from_secs(3)));
    }

    #[test]
    fn total_wait_budget_counts_the_next_wait() {
        let policy = RateLimitPolicy {
            max_waits: None,
            max_total_wait: Some(Duration::from_secs(10)),
        };
        let state = RetryState {
            attempts: 2,
            waits: 1,
            waited: Duration::from_secs(8),
        };
        assert!(policy.allows(&state, Duration::from_secs(2)));
        assert!(!policy.allows(&state, Duration::from_secs(3)));
    }

    #[test]
    fn overflowing_total_wait_is_over_budget() {
        let policy = RateLimitPolicy {
            max_waits: None,
            max_total_wait: Some(Duration::MAX),
        };
        let state = RetryState {
            attempts: 2,
            waits: 1,
            waited: Duration::from_secs(5),
        };
        assert!(!policy.allows(&state, Duration::from_secs(u64::MAX)));
    }

    #[test]
    fn unbounded_policy_always_allows() {
        let state = RetryState {
            attempts: 1000,
            waits: 999,
            waited: Duration::from_secs(86_400),
        };
        assert!(RateLimitPolicy::unbounded().allows(&state, Duration::from_secs(60)));
    }

    #[test]
    fn default_headers_merge_and_replace() {
        let mut client = RequestClient::new().unwrap();
        client
            .set_default_headers([("Accept", "application/json"), ("X-API-Key", "one")])
            .unwrap();
        client.set_default_headers([("x-api-key", "two")]).unwrap();

        let headers = client.default_headers();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers["accept"], "application/json");
        assert_eq!(headers["x-api-key"], "two");
    }

    #[test]
    fn invalid_header_leaves_existing_headers_alone() {
        let mut client = RequestClient::new().unwrap();
        client.set_default_headers([("X-API-Key", "one")]).unwrap();

        let err = client
            .set_default_headers([("Accept", "text/csv"), ("bad header", "x")])
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidHeader { ref name, .. } if name == "bad header"));
        assert_eq!(client.default_headers().len(), 1);
    }

    #[tokio::test]
    async fn malformed_url_is_rejected_before_sending() {
        let client = RequestClient::new().unwrap();
        let err = client.fetch_json("not a url").await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
    }
}
