//! Sealed rebuild commands.
//!
//! A command is encrypted once under a fresh symmetric key, and that key is
//! wrapped for each party allowed to read it. [`SealedCommand`] still holds
//! the symmetric key and the plaintext digest; [`RebuildEnvelope`] is what
//! goes on the wire and has neither.

use std::collections::BTreeMap;

use grille_crypto::{
    CryptoError, Fingerprint, RootSecret, SecretKey, decrypt_with_root,
    encoding::serde_multibase,
    wrap::{open_payload, seal_payload},
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::{env::Environment, recipients::encrypt_for_recipient, record::Ciphertext};

/// A command sealed under its own symmetric key.
pub struct SealedCommand {
    key: SecretKey,
    digest: [u8; 32],
    ciphertext: Vec<u8>,
    wrapped_keys: BTreeMap<Fingerprint, Ciphertext>,
}

impl SealedCommand {
    /// Seal `plaintext` under a fresh key drawn from `env`.
    pub fn seal<E: Environment>(plaintext: &[u8], env: &E) -> Result<Self, CryptoError> {
        let mut bytes = Zeroizing::new([0u8; 32]);
        env.random_bytes(&mut bytes[..]);
        let key = SecretKey::from_bytes(*bytes);

        let ciphertext = seal_payload(&key, plaintext, env.nonce())?;
        let digest = Sha256::digest(plaintext).into();

        Ok(Self { key, digest, ciphertext, wrapped_keys: BTreeMap::new() })
    }

    /// Wrap the symmetric key for one more reader.
    pub fn wrap_for<E: Environment>(
        &mut self,
        fingerprint: Fingerprint,
        encryption_key: &[u8; 32],
        env: &E,
    ) -> Result<(), CryptoError> {
        let wrapped = encrypt_for_recipient(self.key.as_bytes(), encryption_key, env)?;
        self.wrapped_keys.insert(fingerprint, wrapped);
        Ok(())
    }

    /// SHA-256 of the plaintext command.
    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// Readers the key is wrapped for.
    pub fn readers(&self) -> impl Iterator<Item = &Fingerprint> {
        self.wrapped_keys.keys()
    }

    /// Wire form: ciphertext and wrapped keys only.
    pub fn into_envelope(self) -> RebuildEnvelope {
        let Self { key, digest: _, ciphertext, wrapped_keys } = self;
        key.dispose();
        RebuildEnvelope { ciphertext, keys: wrapped_keys }
    }
}

/// Rebuild command as sent to a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildEnvelope {
    /// Command sealed under the symmetric key
    #[serde(with = "serde_multibase")]
    pub ciphertext: Vec<u8>,
    /// Symmetric key wrapped per reader fingerprint
    pub keys: BTreeMap<Fingerprint, Ciphertext>,
}

impl RebuildEnvelope {
    /// Open the command as the CA.
    pub fn open_with_root(&self, root: &RootSecret) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let reader = Fingerprint::of(&root.public_key());
        let wrapped = self.keys.get(&reader).ok_or_else(|| CryptoError::DecryptionFailed {
            reason: format!("command not wrapped for {reader}"),
        })?;

        let key = SecretKey::from_slice(&decrypt_with_root(root, &wrapped.0)?)?;
        open_payload(&key, &self.ciphertext)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use grille_crypto::wrap::agreement_public_key;

    use super::*;

    #[derive(Clone)]
    struct CountingEnv;

    impl Environment for CountingEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            Instant::now()
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte = (i as u8).wrapping_mul(31).wrapping_add(7);
            }
        }
    }

    #[test]
    fn envelope_opens_for_root_reader() {
        let env = CountingEnv;
        let root = RootSecret::from_bytes([9; 32]);
        let anchor = root.public_key();

        let mut sealed = SealedCommand::seal(br#"{"keys":{}}"#, &env).unwrap();
        sealed
            .wrap_for(Fingerprint::of(&anchor), &agreement_public_key(&anchor), &env)
            .unwrap();
        assert_eq!(sealed.digest(), &<[u8; 32]>::from(Sha256::digest(br#"{"keys":{}}"#)));

        let envelope = sealed.into_envelope();
        let opened = envelope.open_with_root(&root).unwrap();
        assert_eq!(opened.as_slice(), br#"{"keys":{}}"#);
    }

    #[test]
    fn envelope_without_root_reader_cannot_be_opened() {
        let env = CountingEnv;
        let root = RootSecret::from_bytes([9; 32]);

        let envelope = SealedCommand::seal(b"payload", &env).unwrap().into_envelope();
        assert!(envelope.keys.is_empty());
        assert!(matches!(
            envelope.open_with_root(&root),
            Err(CryptoError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn envelope_json_has_no_plaintext_fields() {
        let env = CountingEnv;
        let envelope = SealedCommand::seal(b"payload", &env).unwrap().into_envelope();
        let json = serde_json::to_value(&envelope).unwrap();

        let fields: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(fields, vec!["ciphertext", "keys"]);
    }
}
