//! Recipient certificates and re-encryption.
//!
//! Recovered keys are re-encrypted for every key custodian whose certificate
//! chain verifies against the CA anchor. The working set is replaced
//! wholesale by a loader; readers take an `Arc` snapshot and never observe a
//! half-replaced set.

use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock},
};

use ed25519_dalek::VerifyingKey;
use grille_crypto::{CertificateChain, CryptoError, Fingerprint, encrypt_for_recipient as wrap};

use crate::{env::Environment, record::Ciphertext};

/// Certificate role carried by key custodian instances.
pub const KEY_MASTER_ROLE: &str = "maitredescles";

/// A key custodian certificate chain verified against the CA anchor.
#[derive(Debug, Clone)]
pub struct RecipientCertificate {
    chain: CertificateChain,
    subject: String,
    fingerprint: Fingerprint,
    encryption_key: [u8; 32],
}

impl RecipientCertificate {
    /// Verify `chain` against `anchor` and extract the leaf's keys.
    pub fn verify(chain: CertificateChain, anchor: &VerifyingKey) -> Result<Self, CryptoError> {
        let leaf = chain.verify(anchor)?;
        let subject = leaf.subject().to_string();
        let fingerprint = leaf.fingerprint()?;
        let encryption_key = leaf.encryption_key()?;

        Ok(Self { chain, subject, fingerprint, encryption_key })
    }

    /// Leaf subject (instance id).
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Fingerprint of the leaf public key.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// X25519 key secrets are encrypted for.
    pub fn encryption_key(&self) -> &[u8; 32] {
        &self.encryption_key
    }

    /// The verified chain.
    pub fn chain(&self) -> &CertificateChain {
        &self.chain
    }
}

/// Shared working set of recipient certificates.
///
/// Cheap to clone; clones observe the same set.
#[derive(Debug, Clone, Default)]
pub struct RecipientSet {
    current: Arc<RwLock<Arc<[RecipientCertificate]>>>,
}

impl RecipientSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set.
    pub fn replace(&self, recipients: Vec<RecipientCertificate>) {
        let next: Arc<[RecipientCertificate]> = recipients.into();
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Verify chains against `anchor`, keep key custodian leaves, and
    /// replace the set with them. Returns the number accepted.
    pub fn load(
        &self,
        chains: impl IntoIterator<Item = CertificateChain>,
        anchor: &VerifyingKey,
    ) -> usize {
        let mut accepted = Vec::new();

        for chain in chains {
            match RecipientCertificate::verify(chain, anchor) {
                Ok(recipient) => {
                    let is_custodian = recipient
                        .chain()
                        .leaf()
                        .is_some_and(|leaf| leaf.has_role(KEY_MASTER_ROLE));
                    if is_custodian {
                        accepted.push(recipient);
                    } else {
                        tracing::warn!(
                            subject = recipient.subject(),
                            "ignoring recipient without key custodian role"
                        );
                    }
                },
                Err(err) => tracing::warn!(error = %err, "rejecting recipient certificate"),
            }
        }

        let count = accepted.len();
        self.replace(accepted);
        tracing::info!(recipients = count, "loaded recipient certificates");
        count
    }

    /// Consistent view of the current set.
    pub fn snapshot(&self) -> Arc<[RecipientCertificate]> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Number of recipients in the current set.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether the current set is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encrypt `secret` for every recipient, keyed by fingerprint.
///
/// An empty recipient list yields an empty map.
pub fn encrypt_for_recipients<E: Environment>(
    secret: &[u8],
    recipients: &[RecipientCertificate],
    env: &E,
) -> Result<BTreeMap<Fingerprint, Ciphertext>, CryptoError> {
    recipients
        .iter()
        .map(|recipient| {
            let ciphertext = encrypt_for_recipient(secret, recipient.encryption_key(), env)?;
            Ok((recipient.fingerprint().clone(), ciphertext))
        })
        .collect()
}

/// Encrypt `secret` for a single X25519 recipient key.
pub fn encrypt_for_recipient<E: Environment>(
    secret: &[u8],
    recipient_key: &[u8; 32],
    env: &E,
) -> Result<Ciphertext, CryptoError> {
    wrap(secret, recipient_key, &env.wrap_entropy()).map(Ciphertext)
}
