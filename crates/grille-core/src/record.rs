//! Key records and the payloads exchanged with the key store.

use std::collections::BTreeMap;

use grille_crypto::{
    DomainKeySignature, Fingerprint, KeyId, SecretKey, encoding::serde_multibase,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// A key the custodians cannot currently decrypt.
///
/// Created when fetched from the key store, gains a decrypted secret when
/// recovery succeeds, and is dropped once resubmitted.
#[derive(Debug, Clone)]
pub struct KeyRecord {
    key_id: KeyId,
    signature: DomainKeySignature,
    decrypted_secret: Option<SecretKey>,
}

impl KeyRecord {
    /// Record for a signature, id derived from the signature.
    pub fn new(signature: DomainKeySignature) -> Self {
        Self { key_id: signature.key_id(), signature, decrypted_secret: None }
    }

    /// Key identifier.
    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    /// Signed provenance of the key.
    pub fn signature(&self) -> &DomainKeySignature {
        &self.signature
    }

    /// Attach the recovered secret.
    pub fn attach_secret(&mut self, secret: SecretKey) {
        self.decrypted_secret = Some(secret);
    }

    /// Recovered secret, if any.
    pub fn decrypted_secret(&self) -> Option<&SecretKey> {
        self.decrypted_secret.as_ref()
    }

    /// Recovered secret as base64.
    pub fn decrypted_secret_base64(&self) -> Option<Zeroizing<String>> {
        self.decrypted_secret.as_ref().map(SecretKey::to_base64)
    }
}

/// Progress of one recovery run.
///
/// `total` is a snapshot taken when the run starts; `current` never
/// decreases and may finish below `total` if the store drifted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoveryProgress {
    /// Undecryptable keys counted at the start of the run
    pub total: u64,
    /// Keys processed so far
    pub current: u64,
    /// Run finished
    pub done: bool,
}

/// One page of undecryptable keys.
#[derive(Debug, Clone, Default)]
pub struct UndecryptableBatch {
    /// Records in this page
    pub records: Vec<KeyRecord>,
    /// Cursor to request the next page with
    pub next_cursor: u64,
}

/// Whether a submission waits for the store's acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delivery {
    /// Wait until the store confirms the batch is persisted
    Acknowledged,
    /// Fire and continue
    NoWait,
}

/// Ciphertext bytes, multibase encoded on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext(#[serde(with = "serde_multibase")] pub Vec<u8>);

/// A recovered key encrypted for every current recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReEncryptedKey {
    /// Original signature, so the store can re-verify provenance
    pub signature: DomainKeySignature,
    /// One ciphertext per recipient fingerprint
    pub ciphertexts: BTreeMap<Fingerprint, Ciphertext>,
}

/// Resubmission payload: `key_id -> {fingerprint -> ciphertext}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReEncryptedBatch {
    /// Re-encrypted keys by id
    pub keys: BTreeMap<KeyId, ReEncryptedKey>,
}

impl ReEncryptedBatch {
    /// Number of keys in the batch.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the batch carries no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Backup statistics reported by a backup host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupStats {
    /// Number of backup archives
    pub archives: u64,
    /// Number of transactions across archives
    pub transactions: u64,
}

/// Backup key material one host holds for one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostBackup {
    /// Backup host identifier
    pub host: String,
    /// Domain the backup belongs to
    pub domain: String,
    /// CA-wrapped keys by id
    #[serde(default)]
    pub keys: BTreeMap<KeyId, DomainKeySignature>,
    /// Archive statistics, when requested
    #[serde(default)]
    pub stats: Option<BackupStats>,
}

/// Backup key material across all known hosts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupKeys {
    /// One entry per host and domain
    pub per_host: Vec<HostBackup>,
}
