//! Error taxonomy for the containment pipeline
//!
//! Component failures are carried as explicit values and reduced to a
//! logged record plus a safe verdict at the mediator boundary. Only
//! `Protocol` and startup-time `Storage` failures terminate the process.

use std::path::PathBuf;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the containment pipeline
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Backing store unreachable or corrupt
    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Referenced process or path no longer exists
    #[error("resolution failure for {subject}: {source}")]
    Resolution {
        subject: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed kernel event; continuing risks misinterpreting event memory
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Operation refused by an invariant guard
    #[error("rejected operation: {0}")]
    Rejected(String),

    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Resolution failures are expected and frequent; they are logged at
    /// low severity and never tear down the event loop.
    pub fn is_resolution(&self) -> bool {
        matches!(self, Error::Resolution { .. })
    }

    pub fn resolution(subject: impl Into<String>, source: std::io::Error) -> Self {
        Error::Resolution {
            subject: subject.into(),
            source,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
