//! Connection layer of the request client.
//!
//! Retries on connection failures and on a fixed set of status codes happen
//! here, inside `reqwest-middleware`, before the client's own rate-limit loop
//! ever sees the response. HTTP 429 is deliberately left alone so the caller
//! can honour `Retry-After`.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{
    default_on_request_failure, policies::ExponentialBackoff, Retryable, RetryableStrategy,
    RetryTransientMiddleware,
};

/// Status codes retried by the connection layer unless configured otherwise.
pub const DEFAULT_RETRY_STATUSES: [u16; 3] = [502, 503, 504];

/// Settings for the pooled session and its transport retries.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Shortest backoff between two attempts.
    pub backoff_min: Duration,
    /// Longest backoff between two attempts.
    pub backoff_max: Duration,
    /// Status codes treated as transient.
    pub retry_statuses: Vec<u16>,
    /// `User-Agent` sent with every request.
    pub user_agent: Option<String>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_retries: 5,
            backoff_min: Duration::from_millis(1500),
            backoff_max: Duration::from_secs(30),
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
            user_agent: Some(concat!("coinfetch/", env!("CARGO_PKG_VERSION")).to_string()),
        }
    }
}

/// Retries the configured status codes and transient request failures.
#[derive(Debug, Clone)]
pub struct StatusRetryStrategy {
    statuses: Vec<u16>,
}

impl StatusRetryStrategy {
    pub fn new(statuses: Vec<u16>) -> Self {
        Self { statuses }
    }
}

impl RetryableStrategy for StatusRetryStrategy {
    fn handle(
        &self,
        res: &Result<reqwest::Response, reqwest_middleware::Error>,
    ) -> Option<Retryable> {
        match res {
            Ok(response) => {
                let status = response.status();
                if status != StatusCode::TOO_MANY_REQUESTS
                    && self.statuses.contains(&status.as_u16())
                {
                    Some(Retryable::Transient)
                } else {
                    None
                }
            }
            Err(error) => default_on_request_failure(error),
        }
    }
}

/// Builds the pooled session wrapped in the retry middleware.
pub fn build_session(options: &TransportOptions) -> Result<ClientWithMiddleware, reqwest::Error> {
    let mut builder = reqwest::Client::builder().timeout(options.timeout);
    if let Some(agent) = &options.user_agent {
        builder = builder.user_agent(agent.as_str());
    }
    let http = builder.build()?;

    // retry_bounds asserts min <= max
    let (min, max) = if options.backoff_min <= options.backoff_max {
        (options.backoff_min, options.backoff_max)
    } else {
        (options.backoff_max, options.backoff_min)
    };
    let retry_policy = ExponentialBackoff::builder()
        .retry_bounds(min, max)
        .build_with_max_retries(options.max_retries);

    Ok(ClientBuilder::new(http)
        .with(RetryTransientMiddleware::new_with_policy_and_strategy(
            retry_policy,
            StatusRetryStrategy::new(options.retry_statuses.clone()),
        ))
        .build())
}
