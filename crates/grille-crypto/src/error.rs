//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors produced by the cryptographic building blocks.
///
/// Every variant is fatal for the value being processed. Callers that batch
/// many keys decide whether a failure drops one key or aborts the batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The password did not unlock the root secret (AEAD tag mismatch).
    #[error("invalid password for root secret")]
    InvalidPassword,

    /// Signature did not verify against the secret it claims to wrap.
    #[error("signature mismatch")]
    SignatureMismatch,

    /// A domain key signature must authorize at least one domain.
    #[error("domain key signature has no domains")]
    EmptyDomains,

    /// Ciphertext could not be opened.
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Why decryption failed
        reason: String,
    },

    /// Key bytes were malformed (wrong length, invalid point, low order).
    #[error("invalid key material: {reason}")]
    InvalidKeyMaterial {
        /// What was wrong with the key
        reason: String,
    },

    /// Certificate or certificate chain failed validation.
    #[error("invalid certificate: {reason}")]
    InvalidCertificate {
        /// Which check failed
        reason: String,
    },

    /// Text or binary encoding could not be parsed.
    #[error("encoding error: {0}")]
    Encoding(String),
}

impl CryptoError {
    pub(crate) fn decryption(reason: impl Into<String>) -> Self {
        Self::DecryptionFailed { reason: reason.into() }
    }

    pub(crate) fn key_material(reason: impl Into<String>) -> Self {
        Self::InvalidKeyMaterial { reason: reason.into() }
    }

    pub(crate) fn certificate(reason: impl Into<String>) -> Self {
        Self::InvalidCertificate { reason: reason.into() }
    }
}
