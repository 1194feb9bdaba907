//! Error types for token acquisition and repository listing.

use thiserror::Error;

/// Failures that abort a mirror run before any repository is synced.
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("API request to {url} failed with status {status}")]
    Api { status: u16, url: String },

    #[error("Team listing spans multiple pages (size {size} > pagelen {pagelen}); pagination is not supported for teams")]
    Pagination { size: u64, pagelen: u64 },

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A specialized Result type for catalog and token operations.
pub type Result<T> = std::result::Result<T, MirrorError>;
