//! Provides the error type shared by all components of the cache.
//!
//! Note that a cache miss is never reported as an error. Lookups which might miss return an
//! **Option** and only failures (invalid input, failed loads, broken configuration) end up as
//! a [CacheError](CacheError).
//!
//! As a single failed load is handed out to every caller which waited for the same key, the
//! error has to be **Clone**. Therefore the underlying causes (which are plain **anyhow**
//! errors provided by getters and peers) are kept in an **Arc**.
use std::sync::Arc;

use thiserror::Error;

/// Represents an error reported by a user supplied getter or by a peer.
pub type SharedError = Arc<anyhow::Error>;

/// Result type alias used throughout the cache.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Enumerates all errors which can occur when loading or configuring a cache group.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// An empty key was passed to [Group::get](crate::group::Group::get).
    #[error("A non-empty key is required")]
    InvalidKey,

    /// A group was wired incorrectly (e.g. no getter or peers registered twice).
    ///
    /// This is a programming mistake rather than a runtime condition and should most probably
    /// abort the setup of the hosting process.
    #[error("Invalid cache setup: {0}")]
    Configuration(String),

    /// The local source of truth failed to provide a value.
    #[error("Failed to load value from source: {0}")]
    Source(SharedError),

    /// A remote peer failed to provide a value.
    ///
    /// Note that [Group::load](crate::group::Group::load) recovers from this by falling back
    /// to the local getter, so this is only seen when talking to a peer directly.
    #[error("Failed to fetch value from peer: {0}")]
    Peer(SharedError),

    /// The system configuration contains an invalid value.
    #[error("Invalid config: {0}")]
    Config(String),
}

impl CacheError {
    /// Wraps an error reported by a getter.
    pub fn from_source(error: anyhow::Error) -> Self {
        CacheError::Source(Arc::new(error))
    }

    /// Wraps an error reported by a peer.
    pub fn from_peer(error: anyhow::Error) -> Self {
        CacheError::Peer(Arc::new(error))
    }
}
