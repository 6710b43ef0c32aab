//! Error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by query logging and the performance watchdog.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Deser(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("couldn't listen for shutdown signal: {0}")]
    Signal(#[source] std::io::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
