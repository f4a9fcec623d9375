//! case-ingest library crate.
//!
//! Ingest execution core for forensic case analysis: ingest modules run in
//! ordered pipelines under a job scheduler with cooperative cancellation and
//! process timeouts, while displayed file entities are enriched in the
//! background and merged into closed property sheets.

pub mod case;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod node;
pub mod properties;

pub use error::{Error, Result};
