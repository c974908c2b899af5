use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use grille_crypto::{DomainKeySignature, Fingerprint, KeyId};

use super::{KeyStore, StoreError};
use crate::record::{
    BackupKeys, Ciphertext, Delivery, HostBackup, KeyRecord, ReEncryptedBatch,
    UndecryptableBatch,
};

/// One submission received by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Number of keys in the submitted batch
    pub keys: usize,
    /// Delivery mode requested by the caller
    pub delivery: Delivery,
}

/// In-memory key store for testing and simulation
///
/// Keys are kept in insertion order; the cursor is a position in that order,
/// so keys becoming decryptable mid-run never shift later pages. A key is
/// undecryptable while no custodian holds a ciphertext for it. Uses
/// `lock().expect()` which will panic if the mutex is poisoned - acceptable
/// for test code.
#[derive(Clone, Default)]
pub struct MemoryKeyStore {
    inner: Arc<Mutex<MemoryKeyStoreInner>>,
}

#[derive(Default)]
struct MemoryKeyStoreInner {
    /// Keys in insertion order
    keys: Vec<StoredKey>,

    /// Backup material per host and domain
    backups: Vec<HostBackup>,

    /// Every submission, in arrival order
    submissions: Vec<Submission>,

    /// Page sizes returned by each fetch
    fetches: Vec<usize>,
}

struct StoredKey {
    key_id: KeyId,
    signature: DomainKeySignature,
    holders: BTreeMap<Fingerprint, Ciphertext>,
}

impl MemoryKeyStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key no custodian holds yet.
    #[allow(clippy::expect_used)]
    pub fn insert_undecryptable(&self, signature: DomainKeySignature) -> KeyId {
        let key_id = signature.key_id();
        self.inner.lock().expect("Mutex poisoned").keys.push(StoredKey {
            key_id: key_id.clone(),
            signature,
            holders: BTreeMap::new(),
        });
        key_id
    }

    /// Add backup material for one host.
    #[allow(clippy::expect_used)]
    pub fn insert_backup(&self, backup: HostBackup) {
        self.inner.lock().expect("Mutex poisoned").backups.push(backup);
    }

    /// Make a key decryptable outside of any recovery run.
    #[allow(clippy::expect_used)]
    pub fn mark_decryptable(&self, key_id: &KeyId, holder: Fingerprint) {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        if let Some(key) = inner.keys.iter_mut().find(|k| &k.key_id == key_id) {
            key.holders.insert(holder, Ciphertext(Vec::new()));
        }
    }

    /// Number of keys still undecryptable.
    #[allow(clippy::expect_used)]
    pub fn undecryptable_len(&self) -> usize {
        let inner = self.inner.lock().expect("Mutex poisoned");
        inner.keys.iter().filter(|k| k.holders.is_empty()).count()
    }

    /// Ciphertexts held for a key.
    #[allow(clippy::expect_used)]
    pub fn holders(&self, key_id: &KeyId) -> BTreeMap<Fingerprint, Ciphertext> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        inner
            .keys
            .iter()
            .find(|k| &k.key_id == key_id)
            .map(|k| k.holders.clone())
            .unwrap_or_default()
    }

    /// Submissions received so far.
    #[allow(clippy::expect_used)]
    pub fn submissions(&self) -> Vec<Submission> {
        self.inner.lock().expect("Mutex poisoned").submissions.clone()
    }

    /// Page sizes returned by every fetch so far.
    #[allow(clippy::expect_used)]
    pub fn fetch_sizes(&self) -> Vec<usize> {
        self.inner.lock().expect("Mutex poisoned").fetches.clone()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn count_undecryptable(&self) -> Result<u64, StoreError> {
        Ok(self.undecryptable_len() as u64)
    }

    #[allow(clippy::expect_used)]
    async fn fetch_undecryptable_batch(
        &self,
        cursor: u64,
        limit: usize,
    ) -> Result<UndecryptableBatch, StoreError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        let mut records = Vec::with_capacity(limit);
        let mut next_cursor = cursor;
        for (index, key) in inner.keys.iter().enumerate().skip(cursor as usize) {
            if records.len() == limit {
                break;
            }
            next_cursor = index as u64 + 1;
            if key.holders.is_empty() {
                records.push(KeyRecord::new(key.signature.clone()));
            }
        }

        inner.fetches.push(records.len());
        Ok(UndecryptableBatch { records, next_cursor })
    }

    #[allow(clippy::expect_used)]
    async fn submit_reencrypted_batch(
        &self,
        batch: ReEncryptedBatch,
        delivery: Delivery,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.submissions.push(Submission { keys: batch.len(), delivery });

        for (key_id, reencrypted) in batch.keys {
            match inner.keys.iter().position(|k| k.key_id == key_id) {
                Some(index) => inner.keys[index].holders.extend(reencrypted.ciphertexts),
                None => inner.keys.push(StoredKey {
                    key_id,
                    signature: reencrypted.signature,
                    holders: reencrypted.ciphertexts,
                }),
            }
        }

        Ok(())
    }

    #[allow(clippy::expect_used)]
    async fn fetch_backup_keys(
        &self,
        domain: &str,
        include_stats: bool,
        include_keys: bool,
    ) -> Result<BackupKeys, StoreError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        let per_host = inner
            .backups
            .iter()
            .filter(|backup| backup.domain == domain)
            .map(|backup| HostBackup {
                host: backup.host.clone(),
                domain: backup.domain.clone(),
                keys: if include_keys { backup.keys.clone() } else { BTreeMap::new() },
                stats: if include_stats { backup.stats } else { None },
            })
            .collect();

        Ok(BackupKeys { per_host })
    }
}
