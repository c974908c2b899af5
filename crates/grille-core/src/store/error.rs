//! Key store errors.

use thiserror::Error;

/// Errors returned by a [`super::KeyStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Transport failure talking to the store
    #[error("transport error: {0}")]
    Transport(String),

    /// No reply within the deadline
    #[error("request timed out")]
    Timeout,

    /// Store refused the request
    #[error("store rejected request: {0}")]
    Rejected(String),

    /// Reply could not be decoded
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Local I/O failure (file-backed stores)
    #[error("I/O error: {0}")]
    Io(String),
}

impl StoreError {
    /// Returns true if a retry may succeed.
    ///
    /// Rejections and malformed replies are never transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout | Self::Io(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_are_transient() {
        assert!(StoreError::Transport("reset".to_string()).is_transient());
        assert!(StoreError::Timeout.is_transient());
        assert!(StoreError::Io("disk".to_string()).is_transient());
    }

    #[test]
    fn rejections_are_fatal() {
        assert!(!StoreError::Rejected("bad signature".to_string()).is_transient());
        assert!(!StoreError::Malformed("truncated".to_string()).is_transient());
    }
}
