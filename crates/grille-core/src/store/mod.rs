//! Key store abstraction.
//!
//! The key store is the remote key custodian domain. It counts and pages
//! through keys no custodian can currently decrypt, accepts re-encrypted
//! batches, and serves backup key material per domain.
//!
//! Implementations must be `Send + Sync`; in-memory implementations share
//! state through `Arc`, so clones observe the same store.

mod chaotic;
mod error;
mod memory;

use async_trait::async_trait;
pub use chaotic::ChaoticKeyStore;
pub use error::StoreError;
pub use memory::{MemoryKeyStore, Submission};

use crate::record::{BackupKeys, Delivery, ReEncryptedBatch, UndecryptableBatch};

/// Remote store of wrapped domain keys.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Number of keys no custodian can currently decrypt.
    async fn count_undecryptable(&self) -> Result<u64, StoreError>;

    /// Page of undecryptable keys starting at a store-assigned cursor.
    ///
    /// # Invariants
    ///
    /// - Returns at most `limit` records
    /// - An empty page means the store has nothing left past `cursor`
    /// - For a non-empty page, `next_cursor > cursor`
    async fn fetch_undecryptable_batch(
        &self,
        cursor: u64,
        limit: usize,
    ) -> Result<UndecryptableBatch, StoreError>;

    /// Submit re-encrypted keys.
    ///
    /// With `Delivery::Acknowledged` the call returns only after the store
    /// has persisted the batch; with `Delivery::NoWait` it returns once the
    /// batch is handed off.
    async fn submit_reencrypted_batch(
        &self,
        batch: ReEncryptedBatch,
        delivery: Delivery,
    ) -> Result<(), StoreError>;

    /// Backup key material for `domain` from every backup host.
    async fn fetch_backup_keys(
        &self,
        domain: &str,
        include_stats: bool,
        include_keys: bool,
    ) -> Result<BackupKeys, StoreError>;
}
