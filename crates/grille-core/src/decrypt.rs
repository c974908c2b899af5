//! Batch decryption of CA-wrapped keys.
//!
//! Each record is unwrapped with the root secret and then checked against
//! its own signature. A record that fails either step is reported as
//! rejected and skipped: one malformed or foreign record never aborts the
//! batch. Absence from the output means "not recovered this pass".

use std::collections::BTreeMap;

use grille_crypto::{CryptoError, DomainKeySignature, KeyId, RootSecret, SecretKey, unwrap_from_ca};

/// Why a record was left out of a decrypted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// CA unwrap failed (wrong root, truncated or tampered bytes)
    Undecryptable(CryptoError),
    /// Unwrapped secret does not verify the record's signature
    SignatureMismatch,
}

/// Result of decrypting a batch.
#[derive(Debug, Default)]
pub struct DecryptOutcome {
    /// Successfully decrypted and verified secrets
    pub recovered: BTreeMap<KeyId, SecretKey>,
    /// Records that could not be recovered, with the reason
    pub rejected: Vec<(KeyId, Rejection)>,
    /// Records outside the requested domain (not an error)
    pub skipped: usize,
}

/// Decrypt every record with the root secret.
///
/// With `domain_filter`, records that do not authorize that domain are
/// skipped silently. Every decrypted secret is verified against its record's
/// signature before it is returned.
pub fn decrypt_batch<'a>(
    root: &RootSecret,
    records: impl IntoIterator<Item = (&'a KeyId, &'a DomainKeySignature)>,
    domain_filter: Option<&str>,
) -> DecryptOutcome {
    let mut outcome = DecryptOutcome::default();

    for (key_id, signature) in records {
        if let Some(domain) = domain_filter
            && !signature.authorizes(domain)
        {
            outcome.skipped += 1;
            continue;
        }

        let secret =
            match unwrap_from_ca(root, signature.peer_public_key(), signature.ca_encrypted()) {
                Ok(secret) => secret,
                Err(err) => {
                    tracing::warn!(%key_id, error = %err, "skipping key that cannot be unwrapped");
                    outcome.rejected.push((key_id.clone(), Rejection::Undecryptable(err)));
                    continue;
                },
            };

        if signature.verify(&secret).is_err() {
            tracing::warn!(%key_id, "skipping key whose signature does not match its secret");
            outcome.rejected.push((key_id.clone(), Rejection::SignatureMismatch));
            continue;
        }

        outcome.recovered.insert(key_id.clone(), secret);
    }

    tracing::debug!(
        recovered = outcome.recovered.len(),
        rejected = outcome.rejected.len(),
        skipped = outcome.skipped,
        "decrypted batch"
    );

    outcome
}

#[cfg(test)]
mod tests {
    use grille_crypto::{WrapEntropy, wrap_for_ca};

    use super::*;

    fn wrapped(root: &RootSecret, domains: &[&str], seed: u8) -> (KeyId, DomainKeySignature, SecretKey) {
        let secret = SecretKey::from_bytes([seed; 32]);
        let entropy = WrapEntropy { ephemeral: [seed.wrapping_add(100); 32], nonce: [seed; 24] };
        let (peer, ca_encrypted) = wrap_for_ca(&root.public_key(), &secret, &entropy).unwrap();
        let signature = DomainKeySignature::sign(
            domains.iter().map(ToString::to_string).collect(),
            DomainKeySignature::VERSION,
            peer,
            ca_encrypted,
            &secret,
        )
        .unwrap();
        (signature.key_id(), signature, secret)
    }

    #[test]
    fn unfiltered_batch_recovers_every_valid_key() {
        let root = RootSecret::from_bytes([1; 32]);
        let (id_a, sig_a, secret_a) = wrapped(&root, &["CorePki"], 10);
        let (id_b, sig_b, secret_b) = wrapped(&root, &["MaitreDesCles"], 11);
        let records = BTreeMap::from([(id_a.clone(), sig_a), (id_b.clone(), sig_b)]);

        let outcome = decrypt_batch(&root, &records, None);

        assert_eq!(outcome.recovered.get(&id_a), Some(&secret_a));
        assert_eq!(outcome.recovered.get(&id_b), Some(&secret_b));
        assert!(outcome.rejected.is_empty());
    }

    #[test]
    fn filter_skips_foreign_domains_without_error() {
        let root = RootSecret::from_bytes([1; 32]);
        let (id_a, sig_a, _) = wrapped(&root, &["CorePki"], 10);
        let (id_b, sig_b, _) = wrapped(&root, &["MaitreDesCles", "CorePki"], 11);
        let records = BTreeMap::from([(id_a.clone(), sig_a), (id_b.clone(), sig_b)]);

        let outcome = decrypt_batch(&root, &records, Some("MaitreDesCles"));

        assert_eq!(outcome.recovered.len(), 1);
        assert!(outcome.recovered.contains_key(&id_b));
        assert_eq!(outcome.skipped, 1);
        assert!(outcome.rejected.is_empty());
    }

    #[test]
    fn foreign_root_rejects_without_aborting() {
        let root = RootSecret::from_bytes([1; 32]);
        let other = RootSecret::from_bytes([2; 32]);
        let (id_a, sig_a, _) = wrapped(&other, &["CorePki"], 10);
        let (id_b, sig_b, _) = wrapped(&root, &["CorePki"], 11);
        let records = BTreeMap::from([(id_a.clone(), sig_a), (id_b.clone(), sig_b)]);

        let outcome = decrypt_batch(&root, &records, None);

        assert!(outcome.recovered.contains_key(&id_b));
        assert!(matches!(
            outcome.rejected.as_slice(),
            [(id, Rejection::Undecryptable(_))] if *id == id_a
        ));
    }
}
