//! Pipeline error types.
//!
//! Collaborator errors (`StoreError`, `BusError`, `RebuildError`) live next
//! to their traits and convert into these via `From`.

use grille_crypto::CryptoError;
use thiserror::Error;

use crate::{bus::BusError, restore::RebuildError, store::StoreError};

/// Errors that abort a batch recovery run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecoveryError {
    /// Key store call failed (count, fetch or submit)
    #[error("key store error: {0}")]
    Store(#[from] StoreError),

    /// Re-encryption failed for a recovered key
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// No recipient certificates are loaded
    #[error("no recipient certificates loaded")]
    NoRecipients,

    /// Store returned records without advancing its cursor
    #[error("store cursor stalled at {cursor}")]
    StalledCursor {
        /// Cursor the page was requested with
        cursor: u64,
    },

    /// Configuration rejected before the run started
    #[error("invalid recovery config: {0}")]
    InvalidConfig(String),
}

/// Errors from answering a peer recovery request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    /// No pending request for this instance
    #[error("no pending recovery request for instance {0}")]
    UnknownInstance(String),

    /// Pending request lacks a field needed to answer it
    #[error("recovery request for {instance_id} is missing {field}")]
    IncompleteRequest {
        /// Instance the request came from
        instance_id: String,
        /// Missing field
        field: &'static str,
    },

    /// Root secret could not decrypt the request's wrapped secret
    #[error("cannot decrypt recovery request: {0}")]
    DecryptionFailure(CryptoError),

    /// Requesting instance's certificate chain is not trusted
    #[error("untrusted custodian certificate: {0}")]
    InvalidCertificate(CryptoError),

    /// Root secret does not match the CA anchor
    #[error("root secret does not match the CA anchor")]
    RootSecretMismatch,

    /// Point-to-point response could not be sent
    #[error("submission failed: {0}")]
    Submission(#[from] BusError),

    /// Event body could not be parsed
    #[error("malformed recovery event: {0}")]
    Malformed(String),
}

/// Errors that abort restoring a domain.
///
/// Failure to deliver the rebuild command itself is not an error; it is
/// reported through `RebuildResult`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RestoreError {
    /// Fetching or resubmitting backup keys failed
    #[error("key store error: {0}")]
    Store(#[from] StoreError),

    /// Sealing the rebuild command failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Probing the target domain for its certificate failed
    #[error("domain probe failed: {0}")]
    Probe(#[from] RebuildError),

    /// Domain certificate returned by the probe is not trusted
    #[error("untrusted domain certificate: {0}")]
    UntrustedDomain(CryptoError),

    /// Resubmission requested with no recipient certificates loaded
    #[error("no recipient certificates loaded")]
    NoRecipients,

    /// Rebuild command could not be serialized
    #[error("cannot serialize rebuild command: {0}")]
    Serialization(String),
}
