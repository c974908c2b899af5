//! Shared fixtures: a seeded environment, a CA, and key custodians.

#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use ed25519_dalek::SigningKey;
use grille_core::{Environment, RecipientCertificate, RecipientSet};
use grille_crypto::{
    Certificate, CertificateChain, DomainKeySignature, RootSecret, SecretKey, wrap::agreement_secret,
    wrap_for_ca,
};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use x25519_dalek::StaticSecret;

/// Deterministic environment: seeded ChaCha RNG and a logical clock.
#[derive(Clone)]
pub struct TestEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
    clock: Arc<AtomicU64>,
}

impl TestEnv {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            clock: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn bytes32(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        self.random_bytes(&mut bytes);
        bytes
    }
}

impl Environment for TestEnv {
    type Instant = Duration;

    fn now(&self) -> Duration {
        Duration::from_millis(self.clock.fetch_add(1, Ordering::SeqCst))
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().expect("Mutex poisoned").fill_bytes(buffer);
    }
}

/// A key custodian instance: its identity key and verified certificate.
pub struct Custodian {
    pub signing_key: SigningKey,
    pub certificate: RecipientCertificate,
}

impl Custodian {
    /// X25519 secret matching the certificate's encryption key.
    pub fn decryption_key(&self) -> StaticSecret {
        agreement_secret(&self.signing_key)
    }
}

/// A CA with its root secret and a few custodians.
pub struct Fixture {
    pub env: TestEnv,
    pub root: RootSecret,
    pub ca: SigningKey,
    pub custodians: Vec<Custodian>,
}

impl Fixture {
    pub fn new(seed: u64, custodians: usize) -> Self {
        let env = TestEnv::with_seed(seed);
        let root_bytes = env.bytes32();
        let root = RootSecret::from_bytes(root_bytes);
        let ca = SigningKey::from_bytes(&root_bytes);

        let custodians = (0..custodians)
            .map(|i| {
                let subject = format!("custodian-{i}");
                let signing_key = SigningKey::from_bytes(&env.bytes32());
                let chain = issue_chain(&ca, &subject, &signing_key, &["maitredescles"]);
                let certificate = RecipientCertificate::verify(chain, &root.public_key())
                    .expect("fixture chain verifies");
                Custodian { signing_key, certificate }
            })
            .collect();

        Self { env, root, ca, custodians }
    }

    /// Recipient set holding every custodian.
    pub fn recipients(&self) -> RecipientSet {
        let set = RecipientSet::new();
        set.replace(self.custodians.iter().map(|c| c.certificate.clone()).collect());
        set
    }

    /// Fresh domain secret wrapped for the CA and self-signed.
    pub fn wrapped_key(&self, domains: &[&str]) -> (SecretKey, DomainKeySignature) {
        let secret = SecretKey::from_bytes(self.env.bytes32());
        let (peer, ca_encrypted) = wrap_for_ca(&self.root.public_key(), &secret, &self.env.wrap_entropy())
            .expect("wrap for CA");
        let signature = DomainKeySignature::sign(
            domains.iter().map(|d| d.to_string()).collect(),
            DomainKeySignature::VERSION,
            peer,
            ca_encrypted,
            &secret,
        )
        .expect("sign");
        (secret, signature)
    }

    /// Key wrapped for the CA whose signature was made by another secret.
    pub fn forged_key(&self, domains: &[&str]) -> DomainKeySignature {
        let secret = SecretKey::from_bytes(self.env.bytes32());
        let forger = SecretKey::from_bytes(self.env.bytes32());
        let (peer, ca_encrypted) = wrap_for_ca(&self.root.public_key(), &secret, &self.env.wrap_entropy())
            .expect("wrap for CA");
        DomainKeySignature::sign(
            domains.iter().map(|d| d.to_string()).collect(),
            DomainKeySignature::VERSION,
            peer,
            ca_encrypted,
            &forger,
        )
        .expect("sign")
    }
}

/// Single-link chain for `key`, issued directly by the CA.
pub fn issue_chain(ca: &SigningKey, subject: &str, key: &SigningKey, roles: &[&str]) -> CertificateChain {
    CertificateChain::new(vec![Certificate::issue(
        subject,
        roles.iter().map(|r| r.to_string()).collect(),
        Vec::new(),
        &key.verifying_key(),
        ca,
    )])
}
