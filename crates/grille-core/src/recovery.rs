//! Batch recovery driver.
//!
//! One run walks the store's undecryptable keys page by page:
//!
//! ```text
//! Idle -> Counting -> Fetching -> Decrypting -> ReEncrypting -> Submitting
//!                        ^                                          |
//!                        +------------------------------------------+
//!                     (empty page) -> Done
//! ```
//!
//! The unit of atomicity is one page: it is decrypted, re-encrypted and
//! submitted before cancellation is looked at again. Pages are processed
//! strictly one after another so the store cursor stays meaningful.
//!
//! Re-running after a completed run is idempotent: recovered keys are no
//! longer undecryptable, so the next count is zero.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use grille_crypto::RootSecret;

use crate::{
    decrypt::decrypt_batch,
    env::Environment,
    error::RecoveryError,
    recipients::{RecipientSet, encrypt_for_recipients},
    record::{Delivery, KeyRecord, ReEncryptedBatch, ReEncryptedKey, RecoveryProgress},
    store::KeyStore,
};

/// Tuning for a recovery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryConfig {
    /// Records requested per page
    pub batch_size: usize,
    /// Every `ack_every`-th submitted batch waits for acknowledgement
    pub ack_every: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self { batch_size: 100, ack_every: 10 }
    }
}

impl RecoveryConfig {
    /// Reject zero page sizes and cadences.
    pub fn validate(&self) -> Result<(), RecoveryError> {
        if self.batch_size == 0 {
            return Err(RecoveryError::InvalidConfig("batch_size must be positive".to_string()));
        }
        if self.ack_every == 0 {
            return Err(RecoveryError::InvalidConfig("ack_every must be positive".to_string()));
        }
        Ok(())
    }

    /// Delivery mode for the batch with 0-based submission index `index`.
    pub fn delivery_for(&self, index: u64) -> Delivery {
        if index % self.ack_every == 0 { Delivery::Acknowledged } else { Delivery::NoWait }
    }
}

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryState {
    /// Not running
    #[default]
    Idle,
    /// Counting undecryptable keys
    Counting,
    /// Waiting for the next page
    Fetching,
    /// Unwrapping and verifying a page
    Decrypting,
    /// Encrypting recovered keys for recipients
    ReEncrypting,
    /// Handing the page back to the store
    Submitting,
    /// Store exhausted
    Done,
}

/// Cooperative cancellation flag, checked before each page.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The current page still completes.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Summary of a finished or cancelled run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoveryReport {
    /// Last progress reported
    pub progress: RecoveryProgress,
    /// Whole batches handed back to the store
    pub batches_submitted: u64,
    /// Records dropped because they could not be unwrapped or verified
    pub keys_rejected: u64,
    /// Run stopped at a page boundary on request
    pub cancelled: bool,
}

/// Drives recovery runs against a key store.
pub struct BatchRecoveryDriver<S, E> {
    store: S,
    env: E,
    config: RecoveryConfig,
    state: RecoveryState,
}

impl<S: KeyStore, E: Environment> BatchRecoveryDriver<S, E> {
    /// Create a driver; fails if `config` is invalid.
    pub fn new(store: S, env: E, config: RecoveryConfig) -> Result<Self, RecoveryError> {
        config.validate()?;
        Ok(Self { store, env, config, state: RecoveryState::Idle })
    }

    /// Current state.
    pub fn state(&self) -> RecoveryState {
        self.state
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one recovery pass.
    ///
    /// `on_progress` fires once after counting, after every page, and a
    /// final time with `done: true`. The run ends once `current` reaches
    /// the `total` counted at the start, so keys added mid-run wait for the
    /// next run. An empty page before `total` is reached is not an error:
    /// the store's cursor wins over the count snapshot.
    ///
    /// # Errors
    ///
    /// - `NoRecipients` if the recipient set is empty (checked up front and
    ///   before each re-encryption)
    /// - `Store` if counting, fetching or submitting fails; batches already
    ///   submitted stay submitted
    /// - `StalledCursor` if a non-empty page does not advance the cursor
    pub async fn run(
        &mut self,
        root: &RootSecret,
        recipients: &RecipientSet,
        cancel: &CancelToken,
        mut on_progress: impl FnMut(RecoveryProgress),
    ) -> Result<RecoveryReport, RecoveryError> {
        self.state = RecoveryState::Idle;
        if recipients.is_empty() {
            return Err(RecoveryError::NoRecipients);
        }

        let started = self.env.now();

        self.state = RecoveryState::Counting;
        let total = self.store.count_undecryptable().await?;
        let mut report = RecoveryReport {
            progress: RecoveryProgress { total, current: 0, done: false },
            ..RecoveryReport::default()
        };
        on_progress(report.progress);
        tracing::info!(total, batch_size = self.config.batch_size, "starting key recovery");

        let mut cursor = 0u64;
        // Keys that appear after the count belong to the next run
        while report.progress.current < total {
            if cancel.is_cancelled() {
                tracing::info!(
                    current = report.progress.current,
                    batches = report.batches_submitted,
                    "key recovery cancelled"
                );
                self.state = RecoveryState::Idle;
                report.cancelled = true;
                return Ok(report);
            }

            self.state = RecoveryState::Fetching;
            let remaining = usize::try_from(total - report.progress.current).unwrap_or(usize::MAX);
            let limit = self.config.batch_size.min(remaining);
            let page = self.store.fetch_undecryptable_batch(cursor, limit).await?;
            if page.records.is_empty() {
                break;
            }
            if page.next_cursor <= cursor {
                return Err(RecoveryError::StalledCursor { cursor });
            }
            let fetched = page.records.len() as u64;
            cursor = page.next_cursor;

            let (batch, rejected) = self.recover_page(root, recipients, page.records)?;
            report.keys_rejected += rejected;

            self.state = RecoveryState::Submitting;
            if !batch.is_empty() {
                let delivery = self.config.delivery_for(report.batches_submitted);
                tracing::debug!(
                    index = report.batches_submitted,
                    keys = batch.len(),
                    ?delivery,
                    "submitting re-encrypted batch"
                );
                self.store.submit_reencrypted_batch(batch, delivery).await?;
                report.batches_submitted += 1;
            }

            report.progress.current += fetched;
            on_progress(report.progress);
        }

        self.state = RecoveryState::Done;
        report.progress.done = true;
        on_progress(report.progress);

        let elapsed = self.env.now() - started;
        tracing::info!(
            total,
            current = report.progress.current,
            batches = report.batches_submitted,
            rejected = report.keys_rejected,
            elapsed_ms = elapsed.as_millis() as u64,
            "key recovery finished"
        );

        Ok(report)
    }

    /// Decrypt a page and re-encrypt what was recovered for every recipient.
    fn recover_page(
        &mut self,
        root: &RootSecret,
        recipients: &RecipientSet,
        mut records: Vec<KeyRecord>,
    ) -> Result<(ReEncryptedBatch, u64), RecoveryError> {
        self.state = RecoveryState::Decrypting;
        let mut outcome =
            decrypt_batch(root, records.iter().map(|r| (r.key_id(), r.signature())), None);
        for record in &mut records {
            if let Some(secret) = outcome.recovered.remove(record.key_id()) {
                record.attach_secret(secret);
            }
        }

        self.state = RecoveryState::ReEncrypting;
        let snapshot = recipients.snapshot();
        if snapshot.is_empty() {
            return Err(RecoveryError::NoRecipients);
        }

        let mut batch = ReEncryptedBatch::default();
        for record in records {
            let Some(secret) = record.decrypted_secret() else {
                continue;
            };
            let ciphertexts = encrypt_for_recipients(secret.as_bytes(), &snapshot, &self.env)?;
            batch.keys.insert(
                record.key_id().clone(),
                ReEncryptedKey { signature: record.signature().clone(), ciphertexts },
            );
        }

        Ok((batch, outcome.rejected.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_acks_every_tenth_batch() {
        let config = RecoveryConfig::default();
        assert_eq!(config.batch_size, 100);

        let acked: Vec<u64> =
            (0..25).filter(|&i| config.delivery_for(i) == Delivery::Acknowledged).collect();
        assert_eq!(acked, vec![0, 10, 20]);
    }

    #[test]
    fn zero_values_are_rejected() {
        let config = RecoveryConfig { batch_size: 0, ack_every: 10 };
        assert!(matches!(config.validate(), Err(RecoveryError::InvalidConfig(_))));

        let config = RecoveryConfig { batch_size: 10, ack_every: 0 };
        assert!(matches!(config.validate(), Err(RecoveryError::InvalidConfig(_))));
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        assert!(clone.is_cancelled());
    }
}
