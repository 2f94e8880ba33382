//! # Connections Module
//!
//! Persistent connections to external services. Currently the relational
//! store used for coin metadata.

/// SQLite or PostgreSQL store over the sqlx `Any` driver.
pub mod db_store;
