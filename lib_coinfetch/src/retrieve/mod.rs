//! # Data Retrieval Module
//!
//! This module provides the single HTTP entry point used by every coinfetch
//! tool. Instead of each price or search tool opening its own session and
//! re-implementing retries, they all share one [`request_client::RequestClient`].
//!
//! ## Contained Modules:
//!
//! - **`request_client`**: The `RequestClient`, built on `reqwest` and
//!   `reqwest-middleware`. Transient 5xx responses and connection failures are
//!   retried with exponential backoff by the middleware; HTTP 429 responses are
//!   waited out according to `Retry-After`.
//! - **`transport`**: Construction of the middleware stack and the status-based
//!   retry strategy.
//! - **`envelope`**: The normalized result of a JSON request.
//! - **`url_params`**: Query-string construction with percent-encoding.
//! - **`countdown`**: `Retry-After` parsing and the console countdown shown
//!   while waiting.

/// Countdown and `Retry-After` handling for rate-limited requests.
pub mod countdown;
/// Normalized response envelope.
pub mod envelope;
/// The shared request client.
pub mod request_client;
/// Middleware stack and retry strategy.
pub mod transport;
/// Query-string builder.
pub mod url_params;
