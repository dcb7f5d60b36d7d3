//! Error types for the audit harness

use std::time::Duration;

use metrics_store::StoreError;
use thiserror::Error;

/// Errors produced while driving a browser audit
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Browser automation failure (launch, attach, navigation, CDP command)
    #[error("browser error: {0}")]
    Browser(#[from] chromiumoxide::error::CdpError),

    /// The browser session was already torn down
    #[error("browser session is closed")]
    SessionClosed,

    /// An audit attempt ran past the stuck deadline and was abandoned
    #[error("audit attempt exceeded the stuck deadline of {0:?}")]
    Stuck(Duration),

    /// Navigation ran past the configured page-load ceiling
    #[error("page load exceeded the wait ceiling of {0:?}")]
    LoadTimedOut(Duration),

    /// The spawned attempt task panicked or was cancelled
    #[error("audit attempt task failed: {0}")]
    AttemptTask(String),

    /// Vitals injection or collection failure
    #[error("vitals collection error: {0}")]
    Vitals(#[from] anyhow::Error),

    /// The page load yielded no first contentful paint, so no score can be derived
    #[error("audit produced no usable performance score")]
    NoUsableScore,

    /// Writing a report artifact failed
    #[error("report artifact error: {0}")]
    Artifact(#[from] std::io::Error),

    /// Persisting a sample failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid runtime configuration
    #[error("configuration error: {0}")]
    Config(String),
}
