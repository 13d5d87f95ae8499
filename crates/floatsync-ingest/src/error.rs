//! Error taxonomy for the ingestion pipeline.
//!
//! Every per-unit failure is one of these variants. The pool classifies them
//! with [`IngestError::is_transient`] and [`IngestError::is_permanent_fetch`]
//! to pick the unit's terminal state; nothing here is used for control flow
//! on the success path. A duplicate write is an outcome, not an error (see
//! [`crate::store::PersistOutcome`]).

use floatsync_common::EntityId;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("transient network error fetching {url}: {message}")]
    TransientNetwork { url: String, message: String },

    #[error("permanent fetch failure for {url}: {reason}")]
    PermanentFetch { url: String, reason: String },

    #[error("{url} is negatively cached: {reason}")]
    NegativeCached { url: String, reason: String },

    #[error("no archive root hosts entity {entity}")]
    NoArchiveFound { entity: EntityId },

    #[error("listing unavailable for entity {entity} at {url}: {message}")]
    ListingUnavailable {
        entity: EntityId,
        url: String,
        message: String,
    },

    #[error("failed to extract records from {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("opening {} timed out after {timeout:?}", path.display())]
    OpenTimeout { path: PathBuf, timeout: Duration },

    #[error("database error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Common(#[from] floatsync_common::Error),
}

impl IngestError {
    /// Network blips worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, IngestError::TransientNetwork { .. })
    }

    /// Fetch failures that will not succeed before the negative-cache TTL.
    pub fn is_permanent_fetch(&self) -> bool {
        matches!(
            self,
            IngestError::PermanentFetch { .. } | IngestError::NegativeCached { .. }
        )
    }

    /// Short label used as a structured log field and in run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::TransientNetwork { .. } => "transient_network",
            IngestError::PermanentFetch { .. } => "permanent_fetch",
            IngestError::NegativeCached { .. } => "negative_cached",
            IngestError::NoArchiveFound { .. } => "no_archive_found",
            IngestError::ListingUnavailable { .. } => "listing_unavailable",
            IngestError::Parse { .. } => "parse",
            IngestError::OpenTimeout { .. } => "open_timeout",
            IngestError::Persistence(_) => "persistence",
            IngestError::Io(_) => "io",
            IngestError::Http(_) => "http",
            IngestError::Config(_) => "config",
            IngestError::Common(_) => "common",
        }
    }
}
