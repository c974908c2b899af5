//! Master-key-gated key recovery pipeline.
//!
//! An operator-held root secret is used to recover domain keys that no key
//! custodian can currently decrypt, re-encrypt them for the live custodians,
//! answer individual custodians asking for their own secret back, and rebuild
//! the foundational domains from backups.
//!
//! # Architecture
//!
//! ```text
//!        RootSecret
//!            |
//!   +--------+---------+------------------+
//!   |                  |                  |
//! BatchRecoveryDriver  PeerRecoveryMatcher  RestoreCoordinator
//!   |  decrypt_batch     |  decrypt_with_root |  decrypt_batch(domain)
//!   |  encrypt_for_*     |  encrypt_for_recipient|  SealedCommand
//!   v                    v                    v
//! KeyStore            MessageBus          KeyStore + RebuildChannel
//! ```
//!
//! Collaborators are traits; in-memory implementations ship alongside them
//! for tests and simulation. Time and randomness come from [`Environment`].
//!
//! # Invariants
//!
//! - Only keys whose unwrapped secret verifies their own signature are
//!   re-encrypted or sent anywhere
//! - One recovery run processes pages strictly in cursor order, one at a
//!   time; a page is never half submitted
//! - Recipients are only ever certificates verified against the CA anchor
//! - Plaintext secrets never appear in logs or on the wire

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod decrypt;
pub mod env;
pub mod error;
pub mod peer;
pub mod recipients;
pub mod record;
pub mod recovery;
pub mod restore;
pub mod store;

pub use bus::{BusError, BusEvent, MemoryBus, MessageBus, RecoveryResponse};
pub use decrypt::{DecryptOutcome, Rejection, decrypt_batch};
pub use env::Environment;
pub use error::{PeerError, RecoveryError, RestoreError};
pub use peer::{PeerRecoveryMatcher, PeerRecoveryRequest, RecoveryAnnouncement};
pub use recipients::{
    KEY_MASTER_ROLE, RecipientCertificate, RecipientSet, encrypt_for_recipient,
    encrypt_for_recipients,
};
pub use record::{
    BackupKeys, BackupStats, Ciphertext, Delivery, HostBackup, KeyRecord, ReEncryptedBatch,
    ReEncryptedKey, RecoveryProgress, UndecryptableBatch,
};
pub use recovery::{
    BatchRecoveryDriver, CancelToken, RecoveryConfig, RecoveryReport, RecoveryState,
};
pub use restore::{
    CERTIFICATE_DOMAIN, KEY_MASTER_DOMAIN, MemoryRebuildChannel, RebuildAck, RebuildChannel,
    RebuildEnvelope, RebuildError, RebuildResult, RestoreCoordinator, SealedCommand,
};
pub use store::{ChaoticKeyStore, KeyStore, MemoryKeyStore, StoreError};
