//! Fuzz target for batch recovery under store failures
//!
//! Runs the recovery driver against a fault-injecting store until it
//! converges, with arbitrary page sizes, ack cadence and failure rates.
//!
//! # Strategy
//!
//! - Random failure rate and seed on every store operation
//! - Random page size and acknowledgement cadence
//! - A mix of genuine and forged keys
//!
//! # Invariants
//!
//! - Progress `current` never decreases within a run and `done` is last
//! - Every genuine key ends up held by the custodian
//! - Forged keys are never held by anyone
//! - Once converged, only the forged keys are still counted as undecryptable

#![no_main]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use arbitrary::Arbitrary;
use ed25519_dalek::SigningKey;
use grille_core::{
    BatchRecoveryDriver, CancelToken, ChaoticKeyStore, Environment, MemoryKeyStore,
    RecipientCertificate, RecipientSet, RecoveryConfig,
};
use grille_crypto::{
    Certificate, CertificateChain, DomainKeySignature, RootSecret, SecretKey, wrap_for_ca,
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
struct FuzzInput {
    seed: u64,
    failure_percent: u8,
    batch_size: u8,
    ack_every: u8,
    keys: Vec<bool>,
}

/// Counter-based environment; randomness quality is irrelevant here.
#[derive(Clone)]
struct FuzzEnv {
    counter: Arc<Mutex<u64>>,
    clock: Arc<AtomicU64>,
}

impl Environment for FuzzEnv {
    type Instant = Duration;

    fn now(&self) -> Duration {
        Duration::from_millis(self.clock.fetch_add(1, Ordering::SeqCst))
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        let mut counter = self.counter.lock().unwrap();
        for chunk in buffer.chunks_mut(8) {
            *counter = counter.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let bytes = counter.to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}

fuzz_target!(|input: FuzzInput| {
    let env = FuzzEnv {
        counter: Arc::new(Mutex::new(input.seed)),
        clock: Arc::new(AtomicU64::new(0)),
    };
    let root_bytes = [0x42; 32];
    let root = RootSecret::from_bytes(root_bytes);
    let ca = SigningKey::from_bytes(&root_bytes);

    let custodian = SigningKey::from_bytes(&[0x24; 32]);
    let chain = CertificateChain::new(vec![Certificate::issue(
        "custodian-0",
        vec!["maitredescles".to_string()],
        Vec::new(),
        &custodian.verifying_key(),
        &ca,
    )]);
    let recipient = RecipientCertificate::verify(chain, &root.public_key()).unwrap();
    let recipients = RecipientSet::new();
    recipients.replace(vec![recipient]);

    let memory = MemoryKeyStore::new();
    let mut genuine = Vec::new();
    let mut forged = Vec::new();
    for (i, is_genuine) in input.keys.iter().take(64).enumerate() {
        let secret = SecretKey::from_bytes([i as u8; 32]);
        let Ok((peer, ca_encrypted)) = wrap_for_ca(&root.public_key(), &secret, &env.wrap_entropy())
        else {
            continue;
        };
        let signer = if *is_genuine { secret } else { SecretKey::from_bytes([0xff; 32]) };
        let signature = DomainKeySignature::sign(
            vec!["GrosFichiers".to_string()],
            DomainKeySignature::VERSION,
            peer,
            ca_encrypted,
            &signer,
        )
        .unwrap();
        let key_id = memory.insert_undecryptable(signature);
        if *is_genuine {
            genuine.push(key_id);
        } else {
            forged.push(key_id);
        }
    }

    let failure_rate = f64::from(input.failure_percent % 80) / 100.0;
    let store = ChaoticKeyStore::with_seed(memory.clone(), failure_rate, input.seed);
    let config = RecoveryConfig {
        batch_size: usize::from(input.batch_size % 16) + 1,
        ack_every: u64::from(input.ack_every % 12) + 1,
    };
    let mut driver = BatchRecoveryDriver::new(store, env, config).unwrap();

    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    runtime.block_on(async {
        for _ in 0..10_000 {
            let mut progress = Vec::new();
            let result = driver
                .run(&root, &recipients, &CancelToken::new(), |p| progress.push(p))
                .await;

            assert!(progress.windows(2).all(|w| w[0].current <= w[1].current));
            assert!(progress.iter().rev().skip(1).all(|p| !p.done));

            if let Ok(report) = result {
                if report.progress.done && report.progress.total == forged.len() as u64 {
                    return;
                }
            }
        }
        panic!("recovery did not converge");
    });

    assert!(genuine.iter().all(|id| !memory.holders(id).is_empty()));
    assert!(forged.iter().all(|id| memory.holders(id).is_empty()));
});
