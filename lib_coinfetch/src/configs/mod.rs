//! # Configuration Modules
//!
//! Layered settings for the coinfetch tools: built-in defaults, an optional
//! JSON file, then flags and environment variables parsed by clap.

/// Application and request-client settings.
pub mod config_sys;
