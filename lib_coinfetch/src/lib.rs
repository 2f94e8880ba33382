//! # lib_coinfetch
//!
//! Shared building blocks for the coinfetch command-line tools: a resilient
//! HTTP request client for market-data APIs, plus the small collaborators the
//! tools need around it (configuration, logging, a relational store and CSV
//! export). Each folder is gated behind a cargo feature of the same name.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "connections")]
pub mod connections;
#[cfg(feature = "exports")]
pub mod exports;
#[cfg(feature = "loggers")]
pub mod loggers;
#[cfg(feature = "retrieve")]
pub mod retrieve;

// Re-export the types every tool touches
#[cfg(feature = "configs")]
pub use configs::config_sys::{AppConfig, ClientConfig, ConfigArgs, ConfigError};
#[cfg(feature = "retrieve")]
pub use retrieve::envelope::Envelope;
#[cfg(feature = "retrieve")]
pub use retrieve::request_client::{FetchError, Fetched, RateLimitPolicy, RequestClient};
#[cfg(feature = "retrieve")]
pub use retrieve::url_params::{build_url_with_params, ParamValue};
