//! Key wrapping with X25519 + HKDF-SHA256 + `XChaCha20-Poly1305`.
//!
//! All functions are pure. Ephemeral keys and nonces are supplied by the
//! caller through [`WrapEntropy`].
//!
//! Ed25519 identities double as X25519 encryption keys: a certificate's
//! verifying key maps to its Montgomery form, and the matching signing key
//! yields the X25519 scalar. The root secret therefore decrypts anything
//! wrapped for the CA anchor.
//!
//! Layouts:
//!
//! ```text
//! CA-wrapped:        nonce(24) || aead(secret)      (peer key kept in the signature)
//! Recipient-wrapped: ephemeral(32) || nonce(24) || aead(secret)
//! Sealed payload:    nonce(24) || aead(payload)
//! ```

use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use ed25519_dalek::{SigningKey, VerifyingKey};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::{CryptoError, RootSecret, SecretKey};

/// Size of the `XChaCha20` nonce.
pub const NONCE_SIZE: usize = 24;

/// Size of the ephemeral X25519 public key prefix.
pub const EPHEMERAL_SIZE: usize = 32;

/// Poly1305 tag size.
const TAG_SIZE: usize = 16;

/// HKDF info for keys wrapped for the CA.
const CA_WRAP_INFO: &[u8] = b"grille-ca-wrap-v1";

/// HKDF info for keys wrapped for a recipient certificate.
const RECIPIENT_WRAP_INFO: &[u8] = b"grille-recipient-wrap-v1";

/// AAD for symmetric payload sealing.
const PAYLOAD_AAD: &[u8] = b"grille-payload-v1";

/// Caller-provided randomness for one wrap operation.
#[derive(Clone)]
pub struct WrapEntropy {
    /// Ephemeral X25519 secret
    pub ephemeral: [u8; 32],
    /// `XChaCha20` nonce
    pub nonce: [u8; NONCE_SIZE],
}

impl WrapEntropy {
    /// Fill from a byte source (e.g. an environment RNG).
    pub fn from_fill(mut fill: impl FnMut(&mut [u8])) -> Self {
        let mut ephemeral = [0u8; 32];
        let mut nonce = [0u8; NONCE_SIZE];
        fill(&mut ephemeral);
        fill(&mut nonce);
        Self { ephemeral, nonce }
    }
}

impl Drop for WrapEntropy {
    fn drop(&mut self) {
        zeroize::Zeroize::zeroize(&mut self.ephemeral);
    }
}

/// X25519 public key an Ed25519 verifying key encrypts to.
pub fn agreement_public_key(key: &VerifyingKey) -> [u8; 32] {
    key.to_montgomery().to_bytes()
}

/// X25519 secret matching [`agreement_public_key`] of the signing key's
/// verifying key.
pub fn agreement_secret(key: &SigningKey) -> StaticSecret {
    StaticSecret::from(key.to_scalar_bytes())
}

/// Wrap a domain secret for the CA anchor.
///
/// Returns `(peer_public_key, ca_encrypted)`, the two fields a
/// [`crate::DomainKeySignature`] stores.
pub fn wrap_for_ca(
    anchor: &VerifyingKey,
    secret: &SecretKey,
    entropy: &WrapEntropy,
) -> Result<([u8; 32], Vec<u8>), CryptoError> {
    let ephemeral = StaticSecret::from(entropy.ephemeral);
    let peer_public = PublicKey::from(&ephemeral);
    let key = derive_wrap_key(
        &ephemeral,
        &PublicKey::from(agreement_public_key(anchor)),
        CA_WRAP_INFO,
        peer_public.as_bytes(),
    )?;

    let mut out = Vec::with_capacity(NONCE_SIZE + secret.as_bytes().len() + TAG_SIZE);
    out.extend_from_slice(&entropy.nonce);
    out.extend_from_slice(&aead_encrypt(&key, &entropy.nonce, secret.as_bytes(), CA_WRAP_INFO)?);

    Ok((peer_public.to_bytes(), out))
}

/// Unwrap a CA-wrapped domain secret with the root secret.
///
/// # Errors
///
/// - `DecryptionFailed` if the bytes are truncated, the peer key is low
///   order, or authentication fails
/// - `InvalidKeyMaterial` if the plaintext is not a 32-byte key
pub fn unwrap_from_ca(
    root: &RootSecret,
    peer_public_key: &[u8; 32],
    ca_encrypted: &[u8],
) -> Result<SecretKey, CryptoError> {
    if ca_encrypted.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::decryption(format!(
            "CA-wrapped key too short: {} bytes",
            ca_encrypted.len()
        )));
    }

    let (nonce, ciphertext) = ca_encrypted.split_at(NONCE_SIZE);
    let key = derive_wrap_key(
        &root.agreement_secret(),
        &PublicKey::from(*peer_public_key),
        CA_WRAP_INFO,
        peer_public_key,
    )?;
    let plaintext = aead_decrypt(&key, nonce, ciphertext, CA_WRAP_INFO)?;

    SecretKey::from_slice(&plaintext)
}

/// Encrypt a secret for one recipient's X25519 public key.
pub fn encrypt_for_recipient(
    secret: &[u8],
    recipient: &[u8; 32],
    entropy: &WrapEntropy,
) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = StaticSecret::from(entropy.ephemeral);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let key = derive_wrap_key(
        &ephemeral,
        &PublicKey::from(*recipient),
        RECIPIENT_WRAP_INFO,
        ephemeral_public.as_bytes(),
    )?;

    let mut out = Vec::with_capacity(EPHEMERAL_SIZE + NONCE_SIZE + secret.len() + TAG_SIZE);
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&entropy.nonce);
    out.extend_from_slice(&aead_encrypt(&key, &entropy.nonce, secret, RECIPIENT_WRAP_INFO)?);
    Ok(out)
}

/// Decrypt a recipient-wrapped secret with the recipient's X25519 secret.
pub fn decrypt_for_recipient(
    recipient: &StaticSecret,
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if ciphertext.len() < EPHEMERAL_SIZE + NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::decryption(format!(
            "recipient ciphertext too short: {} bytes",
            ciphertext.len()
        )));
    }

    let (ephemeral, rest) = ciphertext.split_at(EPHEMERAL_SIZE);
    let (nonce, sealed) = rest.split_at(NONCE_SIZE);
    let mut ephemeral_bytes = [0u8; 32];
    ephemeral_bytes.copy_from_slice(ephemeral);

    let key = derive_wrap_key(
        recipient,
        &PublicKey::from(ephemeral_bytes),
        RECIPIENT_WRAP_INFO,
        &ephemeral_bytes,
    )?;
    aead_decrypt(&key, nonce, sealed, RECIPIENT_WRAP_INFO)
}

/// Decrypt a secret that was wrapped for the CA anchor as a recipient.
pub fn decrypt_with_root(
    root: &RootSecret,
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    decrypt_for_recipient(&root.agreement_secret(), ciphertext)
}

/// Seal an arbitrary payload under a symmetric secret key.
pub fn seal_payload(
    key: &SecretKey,
    payload: &[u8],
    nonce: [u8; NONCE_SIZE],
) -> Result<Vec<u8>, CryptoError> {
    let mut out = Vec::with_capacity(NONCE_SIZE + payload.len() + TAG_SIZE);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&aead_encrypt(key.as_bytes(), &nonce, payload, PAYLOAD_AAD)?);
    Ok(out)
}

/// Open a payload sealed by [`seal_payload`].
pub fn open_payload(key: &SecretKey, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::decryption(format!(
            "sealed payload too short: {} bytes",
            sealed.len()
        )));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
    aead_decrypt(key.as_bytes(), nonce, ciphertext, PAYLOAD_AAD)
}

/// ECDH then HKDF-SHA256, salted with the ephemeral public key.
fn derive_wrap_key(
    secret: &StaticSecret,
    public: &PublicKey,
    info: &[u8],
    salt: &[u8],
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let shared = secret.diffie_hellman(public);
    if !shared.was_contributory() {
        return Err(CryptoError::key_material("low-order public key"));
    }

    let hkdf = Hkdf::<Sha256>::new(Some(salt), shared.as_bytes());
    let mut key = Zeroizing::new([0u8; 32]);
    hkdf.expand(info, &mut key[..])
        .map_err(|_| CryptoError::key_material("HKDF output length rejected"))?;
    Ok(key)
}

fn aead_encrypt(
    key: &[u8; 32],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .encrypt(XNonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::key_material("AEAD encryption failed"))
}

fn aead_decrypt(
    key: &[u8; 32],
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::decryption("authentication failed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entropy(seed: u8) -> WrapEntropy {
        WrapEntropy { ephemeral: [seed; 32], nonce: [seed.wrapping_add(1); NONCE_SIZE] }
    }

    #[test]
    fn ca_wrap_unwrap_roundtrip() {
        let root = RootSecret::from_bytes([1u8; 32]);
        let secret = SecretKey::from_bytes([0x5A; 32]);

        let (peer, wrapped) = wrap_for_ca(&root.public_key(), &secret, &entropy(3)).unwrap();
        let unwrapped = unwrap_from_ca(&root, &peer, &wrapped).unwrap();

        assert_eq!(unwrapped, secret);
    }

    #[test]
    fn wrap_key_agrees_on_both_sides() {
        let ours = StaticSecret::from([3u8; 32]);
        let theirs = StaticSecret::from([4u8; 32]);

        let sent = derive_wrap_key(&ours, &PublicKey::from(&theirs), b"info", b"salt").unwrap();
        let received = derive_wrap_key(&theirs, &PublicKey::from(&ours), b"info", b"salt").unwrap();
        assert_eq!(*sent, *received);

        let other = derive_wrap_key(&ours, &PublicKey::from(&theirs), b"other", b"salt").unwrap();
        assert_ne!(*sent, *other);
    }

    #[test]
    fn ca_unwrap_with_other_root_fails() {
        let root = RootSecret::from_bytes([1u8; 32]);
        let other = RootSecret::from_bytes([2u8; 32]);
        let secret = SecretKey::from_bytes([0x5A; 32]);

        let (peer, wrapped) = wrap_for_ca(&root.public_key(), &secret, &entropy(3)).unwrap();
        let result = unwrap_from_ca(&other, &peer, &wrapped);

        assert!(matches!(result, Err(CryptoError::DecryptionFailed { .. })));
    }

    #[test]
    fn ca_unwrap_rejects_truncated_input() {
        let root = RootSecret::from_bytes([1u8; 32]);
        let result = unwrap_from_ca(&root, &[9u8; 32], &[0u8; 10]);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed { .. })));
    }

    #[test]
    fn low_order_peer_key_is_rejected() {
        let root = RootSecret::from_bytes([1u8; 32]);
        let result = unwrap_from_ca(&root, &[0u8; 32], &[0u8; 64]);
        assert!(matches!(result, Err(CryptoError::InvalidKeyMaterial { .. })));
    }

    #[test]
    fn recipient_roundtrip_through_ed25519_identity() {
        let signing = SigningKey::from_bytes(&[7u8; 32]);
        let recipient = agreement_public_key(&signing.verifying_key());

        let ciphertext = encrypt_for_recipient(b"thirty-two bytes of key material", &recipient, &entropy(5))
            .unwrap();
        let plaintext = decrypt_for_recipient(&agreement_secret(&signing), &ciphertext).unwrap();

        assert_eq!(plaintext.as_slice(), b"thirty-two bytes of key material");
    }

    #[test]
    fn recipient_ciphertext_layout() {
        let signing = SigningKey::from_bytes(&[7u8; 32]);
        let recipient = agreement_public_key(&signing.verifying_key());

        let ciphertext = encrypt_for_recipient(&[0u8; 32], &recipient, &entropy(5)).unwrap();

        assert_eq!(ciphertext.len(), EPHEMERAL_SIZE + NONCE_SIZE + 32 + TAG_SIZE);
        assert_eq!(&ciphertext[EPHEMERAL_SIZE..EPHEMERAL_SIZE + NONCE_SIZE], &[6u8; NONCE_SIZE]);
    }

    #[test]
    fn root_decrypts_what_was_encrypted_for_anchor() {
        let root = RootSecret::from_bytes([1u8; 32]);
        let anchor = agreement_public_key(&root.public_key());

        let ciphertext = encrypt_for_recipient(b"custodian key", &anchor, &entropy(8)).unwrap();
        let plaintext = decrypt_with_root(&root, &ciphertext).unwrap();

        assert_eq!(plaintext.as_slice(), b"custodian key");
    }

    #[test]
    fn tampered_recipient_ciphertext_fails() {
        let signing = SigningKey::from_bytes(&[7u8; 32]);
        let recipient = agreement_public_key(&signing.verifying_key());
        let mut ciphertext = encrypt_for_recipient(&[1u8; 32], &recipient, &entropy(5)).unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;

        let result = decrypt_for_recipient(&agreement_secret(&signing), &ciphertext);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed { .. })));
    }

    #[test]
    fn sealed_payload_roundtrip() {
        let key = SecretKey::from_bytes([0x33; 32]);
        let sealed = seal_payload(&key, b"{\"keys\":{}}", [4u8; NONCE_SIZE]).unwrap();
        assert_eq!(open_payload(&key, &sealed).unwrap().as_slice(), b"{\"keys\":{}}");
    }
}
