//! Key store backed by an exported key dump.
//!
//! The export is a JSON document listing undecryptable keys and backup
//! material. Submitted batches are appended to an output file as JSON lines
//! for later import. Acknowledged submissions are flushed and synced before
//! the call returns; the others are left in the write buffer.

use std::{
    collections::BTreeSet,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use grille_core::{
    BackupKeys, Delivery, HostBackup, KeyRecord, KeyStore, ReEncryptedBatch, StoreError,
    UndecryptableBatch,
};
use grille_crypto::{DomainKeySignature, KeyId};
use serde::{Deserialize, Serialize};

use crate::error::ConsoleError;

/// Exported key dump.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyExport {
    /// Keys no custodian can decrypt
    #[serde(default)]
    pub undecryptable: Vec<DomainKeySignature>,
    /// Backup material per host and domain
    #[serde(default)]
    pub backups: Vec<HostBackup>,
}

/// One line of the output file.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmittedBatch {
    /// Delivery mode the batch was submitted with
    pub delivery: Delivery,
    /// Re-encrypted keys
    pub batch: ReEncryptedBatch,
}

/// File-backed key store.
pub struct FileKeyStore {
    export: KeyExport,
    out_path: PathBuf,
    inner: Mutex<FileKeyStoreInner>,
}

struct FileKeyStoreInner {
    submitted: BTreeSet<KeyId>,
    out: BufWriter<File>,
}

impl FileKeyStore {
    /// Open an export and create (truncate) the output file.
    pub fn open(export: &Path, out: &Path) -> Result<Self, ConsoleError> {
        let text = std::fs::read_to_string(export).map_err(|e| ConsoleError::io(export, e))?;
        let export_data: KeyExport =
            serde_json::from_str(&text).map_err(|e| ConsoleError::json(export, e))?;
        let file = File::create(out).map_err(|e| ConsoleError::io(out, e))?;

        tracing::info!(
            keys = export_data.undecryptable.len(),
            backups = export_data.backups.len(),
            export = %export.display(),
            "opened key export"
        );

        Ok(Self::new(export_data, out.to_path_buf(), file))
    }

    fn new(export: KeyExport, out_path: PathBuf, file: File) -> Self {
        Self {
            export,
            out_path,
            inner: Mutex::new(FileKeyStoreInner {
                submitted: BTreeSet::new(),
                out: BufWriter::new(file),
            }),
        }
    }

    /// Output file path.
    pub fn out_path(&self) -> &Path {
        &self.out_path
    }

    /// Flush buffered submissions to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.out.flush()?;
        inner.out.get_ref().sync_data()?;
        Ok(())
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn count_undecryptable(&self) -> Result<u64, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let pending = self
            .export
            .undecryptable
            .iter()
            .filter(|signature| !inner.submitted.contains(&signature.key_id()))
            .count();
        Ok(pending as u64)
    }

    async fn fetch_undecryptable_batch(
        &self,
        cursor: u64,
        limit: usize,
    ) -> Result<UndecryptableBatch, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        let mut records = Vec::with_capacity(limit);
        let mut next_cursor = cursor;
        for (index, signature) in self.export.undecryptable.iter().enumerate().skip(cursor as usize)
        {
            if records.len() == limit {
                break;
            }
            next_cursor = index as u64 + 1;
            let record = KeyRecord::new(signature.clone());
            if !inner.submitted.contains(record.key_id()) {
                records.push(record);
            }
        }

        Ok(UndecryptableBatch { records, next_cursor })
    }

    async fn submit_reencrypted_batch(
        &self,
        batch: ReEncryptedBatch,
        delivery: Delivery,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let ids: Vec<KeyId> = batch.keys.keys().cloned().collect();

        let line = serde_json::to_string(&SubmittedBatch { delivery, batch })
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        writeln!(inner.out, "{line}")?;
        if delivery == Delivery::Acknowledged {
            inner.out.flush()?;
            inner.out.get_ref().sync_data()?;
        }

        inner.submitted.extend(ids);
        Ok(())
    }

    async fn fetch_backup_keys(
        &self,
        domain: &str,
        include_stats: bool,
        include_keys: bool,
    ) -> Result<BackupKeys, StoreError> {
        let per_host = self
            .export
            .backups
            .iter()
            .filter(|backup| backup.domain == domain)
            .map(|backup| HostBackup {
                host: backup.host.clone(),
                domain: backup.domain.clone(),
                keys: if include_keys { backup.keys.clone() } else { Default::default() },
                stats: if include_stats { backup.stats } else { None },
            })
            .collect();
        Ok(BackupKeys { per_host })
    }
}

impl Drop for FileKeyStore {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = inner.out.flush() {
            tracing::warn!(error = %err, path = %self.out_path.display(), "failed to flush output");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use grille_crypto::SecretKey;

    use super::*;

    fn signature(seed: u8) -> DomainKeySignature {
        let secret = SecretKey::from_bytes([seed; 32]);
        DomainKeySignature::sign(vec!["GrosFichiers".to_string()], 1, [seed; 32], vec![seed], &secret)
            .unwrap()
    }

    fn store(keys: usize) -> (tempfile::TempDir, FileKeyStore) {
        let dir = tempfile::tempdir().unwrap();
        let export = KeyExport {
            undecryptable: (0..keys).map(|i| signature(i as u8 + 1)).collect(),
            backups: Vec::new(),
        };
        let out = dir.path().join("out.jsonl");
        let file = File::create(&out).unwrap();
        (dir, FileKeyStore::new(export, out, file))
    }

    #[tokio::test]
    async fn submitted_keys_are_no_longer_undecryptable() {
        let (_dir, store) = store(3);
        let page = store.fetch_undecryptable_batch(0, 2).await.unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.next_cursor, 2);

        let mut batch = ReEncryptedBatch::default();
        let record = &page.records[0];
        batch.keys.insert(
            record.key_id().clone(),
            grille_core::ReEncryptedKey {
                signature: record.signature().clone(),
                ciphertexts: Default::default(),
            },
        );
        store.submit_reencrypted_batch(batch, Delivery::Acknowledged).await.unwrap();

        assert_eq!(store.count_undecryptable().await.unwrap(), 2);
        let lines = std::fs::read_to_string(store.out_path()).unwrap();
        let line: SubmittedBatch = serde_json::from_str(lines.lines().next().unwrap()).unwrap();
        assert_eq!(line.delivery, Delivery::Acknowledged);
        assert_eq!(line.batch.len(), 1);
    }

    #[tokio::test]
    async fn cursor_past_the_end_yields_an_empty_page() {
        let (_dir, store) = store(2);
        let page = store.fetch_undecryptable_batch(5, 10).await.unwrap();
        assert!(page.records.is_empty());
    }
}
