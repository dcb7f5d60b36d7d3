//! Browser-driven web vitals audit harness
//!
//! This crate drives a Chromium browser (launched headless or attached over the
//! DevTools protocol) through the configured set of measurement targets,
//! collects Core Web Vitals for each page load, derives a composite performance
//! score, and appends the resulting samples to the metrics store.
//!
//! The main entry point is [`runner::AuditRunner`], which executes one full
//! batch pass: enumerate active targets, open a fresh browser session per
//! target, run the configured number of attempts (alternating cache state),
//! and record whatever completed.

pub mod audit;
pub mod config;
pub mod error;
pub mod report;
pub mod retry;
pub mod runner;
pub mod score;
pub mod session;
pub mod vitals;

pub use config::CollectorConfig;
pub use error::HarnessError;
pub use runner::{AuditRunner, BatchSummary};
