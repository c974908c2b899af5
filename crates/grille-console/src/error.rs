//! Console errors.

use std::path::PathBuf;

use grille_core::{RecoveryError, StoreError};
use grille_crypto::CryptoError;
use thiserror::Error;

/// Errors surfaced by console commands.
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// File could not be read or written
    #[error("{path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// File content is not the expected JSON
    #[error("{path}: {source}")]
    Json {
        /// File involved
        path: PathBuf,
        /// Underlying error
        source: serde_json::Error,
    },

    /// Master key could not be unlocked, or a certificate is malformed
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Recovery run failed
    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    /// Export store failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Certificate bundle has no usable custodian
    #[error("no trusted key custodian certificate in {0}")]
    NoRecipients(PathBuf),
}

impl ConsoleError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json { path: path.into(), source }
    }
}
