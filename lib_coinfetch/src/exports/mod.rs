//! # Exports Module
//!
//! Turns response envelopes into files for spreadsheets and later analysis.

/// Envelope flattening and CSV output.
pub mod tabular;
