//! Chaotic key store wrapper for fault injection testing
//!
//! Key store wrapper that randomly fails remote calls to test that recovery
//! runs abort cleanly on transport failure and that a re-run resumes without
//! re-processing keys already recovered.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;

use super::{KeyStore, StoreError};
use crate::record::{BackupKeys, Delivery, ReEncryptedBatch, UndecryptableBatch};

/// Chaotic key store wrapper that randomly injects failures
///
/// Delegates to an underlying store but fails calls with a configured
/// probability. A failed call never reaches the inner store, so a failed
/// submission leaves no partial batch behind.
#[derive(Clone)]
pub struct ChaoticKeyStore<S: KeyStore> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    /// Calls attempted, failed or not
    operation_count: Arc<AtomicUsize>,
}

/// Simple deterministic RNG for chaos injection
///
/// Uses linear congruential generator (LCG) for fast, deterministic randomness.
/// This ensures chaos tests are reproducible with the same seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate next random value [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }

    fn should_fail(&mut self, failure_rate: f64) -> bool {
        self.next() < failure_rate
    }
}

impl<S: KeyStore> ChaoticKeyStore<S> {
    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Underlying store (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of calls attempted.
    pub fn operation_count(&self) -> usize {
        self.operation_count.load(Ordering::Relaxed)
    }

    fn chaos(&self, operation: &str) -> Result<(), StoreError> {
        self.operation_count.fetch_add(1, Ordering::Relaxed);

        #[allow(clippy::expect_used)]
        let fail = self.rng.lock().expect("ChaoticRng mutex poisoned").should_fail(self.failure_rate);
        if fail {
            tracing::debug!(operation, "injecting key store failure");
            return Err(StoreError::Transport(format!("injected failure in {operation}")));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: KeyStore> KeyStore for ChaoticKeyStore<S> {
    async fn count_undecryptable(&self) -> Result<u64, StoreError> {
        self.chaos("count_undecryptable")?;
        self.inner.count_undecryptable().await
    }

    async fn fetch_undecryptable_batch(
        &self,
        cursor: u64,
        limit: usize,
    ) -> Result<UndecryptableBatch, StoreError> {
        self.chaos("fetch_undecryptable_batch")?;
        self.inner.fetch_undecryptable_batch(cursor, limit).await
    }

    async fn submit_reencrypted_batch(
        &self,
        batch: ReEncryptedBatch,
        delivery: Delivery,
    ) -> Result<(), StoreError> {
        self.chaos("submit_reencrypted_batch")?;
        self.inner.submit_reencrypted_batch(batch, delivery).await
    }

    async fn fetch_backup_keys(
        &self,
        domain: &str,
        include_stats: bool,
        include_keys: bool,
    ) -> Result<BackupKeys, StoreError> {
        self.chaos("fetch_backup_keys")?;
        self.inner.fetch_backup_keys(domain, include_stats, include_keys).await
    }
}
