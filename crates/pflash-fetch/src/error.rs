use std::{io, path::PathBuf};

use thiserror::Error;

/// Why a single candidate URL was abandoned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("server returned an empty body")]
    EmptyBody,
    #[error("read failed: {0}")]
    Read(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub url: String,
    pub error: NetworkError,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no download sources were supplied")]
    NoSources,

    #[error("all {} download sources failed", .attempts.len())]
    AllSourcesExhausted {
        attempts: Vec<AttemptFailure>,
        /// Vendor page the user can open to download manually.
        fallback: Option<String>,
    },

    #[error("integrity check failed for {}: {reason}", .path.display())]
    Integrity { path: PathBuf, reason: String },

    #[error("download cancelled after {bytes} bytes")]
    Cancelled { bytes: u64 },

    #[error("failed to build http client: {0}")]
    Client(String),

    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FetchError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
