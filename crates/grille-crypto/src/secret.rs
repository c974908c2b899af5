//! Secret key envelopes.
//!
//! Two kinds of secret live in the recovery pipeline:
//!
//! - [`RootSecret`]: the operator's root private key. Its public counterpart
//!   is the certificate authority anchor every CA-wrapped key is encrypted
//!   for. It is unlocked from an [`EncryptedKeyMaterial`] with a password.
//! - [`SecretKey`]: a 32-byte domain secret key recovered from a
//!   CA-wrapped record.
//!
//! Both own their bytes exclusively and overwrite them with zeros when
//! dropped. [`RootSecret::dispose`] and [`SecretKey::dispose`] make release
//! explicit at the call site; the `Drop` impls cover early returns, `?`
//! propagation and cancelled futures.

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use x25519_dalek::StaticSecret;
use zeroize::{Zeroize, Zeroizing};

use crate::{CryptoError, encoding::serde_multibase};

/// Size of a root secret and of every domain secret key.
pub const SECRET_SIZE: usize = 32;

/// Salt length for password key derivation.
pub const SALT_SIZE: usize = 16;

/// AAD binding the sealed root secret to its purpose.
const ROOT_SEAL_AAD: &[u8] = b"grille-root-secret-v1";

/// The operator's root private key.
///
/// Never serialized, never logged. `Debug` prints a redacted marker.
pub struct RootSecret {
    bytes: [u8; SECRET_SIZE],
}

impl RootSecret {
    /// Wrap raw root key bytes.
    pub fn from_bytes(bytes: [u8; SECRET_SIZE]) -> Self {
        Self { bytes }
    }

    /// Public counterpart, which is the certificate authority anchor.
    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key().verifying_key()
    }

    /// Independent copy for a concurrent operation.
    ///
    /// Each recovery run owns its secret; sharing one instance across
    /// concurrent runs is not allowed.
    pub fn duplicate(&self) -> Self {
        Self { bytes: self.bytes }
    }

    /// Overwrite the secret with zeros and release it.
    pub fn dispose(mut self) {
        self.bytes.zeroize();
    }

    pub(crate) fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.bytes)
    }

    pub(crate) fn agreement_secret(&self) -> StaticSecret {
        StaticSecret::from(self.signing_key().to_scalar_bytes())
    }
}

impl Drop for RootSecret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for RootSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RootSecret(<redacted>)")
    }
}

/// A recovered 32-byte domain secret key.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey {
    bytes: [u8; SECRET_SIZE],
}

impl SecretKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; SECRET_SIZE]) -> Self {
        Self { bytes }
    }

    /// Build from a slice, rejecting anything not exactly 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; SECRET_SIZE] = slice.try_into().map_err(|_| {
            CryptoError::key_material(format!(
                "secret key must be {SECRET_SIZE} bytes, got {}",
                slice.len()
            ))
        })?;
        Ok(Self { bytes })
    }

    /// Parse the base64 form produced by [`Self::to_base64`].
    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        let decoded = Zeroizing::new(
            STANDARD.decode(text).map_err(|e| CryptoError::Encoding(e.to_string()))?,
        );
        Self::from_slice(&decoded)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SECRET_SIZE] {
        &self.bytes
    }

    /// Padded standard base64, the `decryptedSecret` form.
    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(STANDARD.encode(self.bytes))
    }

    /// Overwrite the key with zeros and release it.
    pub fn dispose(mut self) {
        self.bytes.zeroize();
    }

    pub(crate) fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.bytes)
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// Argon2id cost parameters stored alongside the sealed root secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Lanes
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self { memory_kib: 65_536, iterations: 3, parallelism: 1 }
    }
}

/// Password-sealed root secret, as stored in a master key file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedKeyMaterial {
    /// Key derivation parameters
    pub kdf: KdfParams,
    /// Argon2 salt
    #[serde(with = "serde_multibase")]
    pub salt: Vec<u8>,
    /// XChaCha20 nonce
    #[serde(with = "serde_multibase")]
    pub nonce: Vec<u8>,
    /// Sealed root secret with Poly1305 tag
    #[serde(with = "serde_multibase")]
    pub ciphertext: Vec<u8>,
}

/// Seal a root secret under a password.
///
/// Salt and nonce must come from a cryptographically secure source.
pub fn seal_root_secret(
    secret: &RootSecret,
    password: &[u8],
    kdf: KdfParams,
    salt: [u8; SALT_SIZE],
    nonce: [u8; 24],
) -> Result<EncryptedKeyMaterial, CryptoError> {
    let key = derive_password_key(password, &salt, kdf)?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key[..]));
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), Payload { msg: &secret.bytes, aad: ROOT_SEAL_AAD })
        .map_err(|_| CryptoError::key_material("root secret sealing failed"))?;

    Ok(EncryptedKeyMaterial { kdf, salt: salt.to_vec(), nonce: nonce.to_vec(), ciphertext })
}

/// Unlock a root secret with its password.
///
/// # Errors
///
/// - `InvalidPassword` if the password is wrong or the material was altered
/// - `InvalidKeyMaterial` if the stored fields have the wrong shape
pub fn load_root_secret(
    material: &EncryptedKeyMaterial,
    password: &[u8],
) -> Result<RootSecret, CryptoError> {
    if material.nonce.len() != 24 {
        return Err(CryptoError::key_material(format!(
            "nonce must be 24 bytes, got {}",
            material.nonce.len()
        )));
    }

    let key = derive_password_key(password, &material.salt, material.kdf)?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key[..]));
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(
                XNonce::from_slice(&material.nonce),
                Payload { msg: &material.ciphertext, aad: ROOT_SEAL_AAD },
            )
            .map_err(|_| CryptoError::InvalidPassword)?,
    );

    let bytes: [u8; SECRET_SIZE] = plaintext.as_slice().try_into().map_err(|_| {
        CryptoError::key_material(format!(
            "root secret must be {SECRET_SIZE} bytes, got {}",
            plaintext.len()
        ))
    })?;
    Ok(RootSecret::from_bytes(bytes))
}

fn derive_password_key(
    password: &[u8],
    salt: &[u8],
    kdf: KdfParams,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(32))
        .map_err(|e| CryptoError::key_material(format!("argon2 parameters: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password, salt, &mut key[..])
        .map_err(|e| CryptoError::key_material(format!("argon2: {e}")))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_kdf() -> KdfParams {
        KdfParams { memory_kib: 1024, iterations: 1, parallelism: 1 }
    }

    #[test]
    fn seal_then_load_returns_same_public_key() {
        let secret = RootSecret::from_bytes([7u8; SECRET_SIZE]);
        let material =
            seal_root_secret(&secret, b"correct horse", fast_kdf(), [1; SALT_SIZE], [2; 24])
                .unwrap();

        let loaded = load_root_secret(&material, b"correct horse").unwrap();
        assert_eq!(loaded.public_key(), secret.public_key());
    }

    #[test]
    fn wrong_password_is_invalid_password() {
        let secret = RootSecret::from_bytes([7u8; SECRET_SIZE]);
        let material =
            seal_root_secret(&secret, b"correct horse", fast_kdf(), [1; SALT_SIZE], [2; 24])
                .unwrap();

        let result = load_root_secret(&material, b"battery staple");
        assert!(matches!(result, Err(CryptoError::InvalidPassword)));
    }

    #[test]
    fn truncated_nonce_is_rejected_before_kdf() {
        let secret = RootSecret::from_bytes([7u8; SECRET_SIZE]);
        let mut material =
            seal_root_secret(&secret, b"pw", fast_kdf(), [1; SALT_SIZE], [2; 24]).unwrap();
        material.nonce.truncate(12);

        let result = load_root_secret(&material, b"pw");
        assert!(matches!(result, Err(CryptoError::InvalidKeyMaterial { .. })));
    }

    #[test]
    fn debug_output_is_redacted() {
        let secret = RootSecret::from_bytes([0xAB; SECRET_SIZE]);
        let key = SecretKey::from_bytes([0xCD; SECRET_SIZE]);
        assert_eq!(format!("{secret:?}"), "RootSecret(<redacted>)");
        assert_eq!(format!("{key:?}"), "SecretKey(<redacted>)");
    }

    #[test]
    fn secret_key_base64_roundtrip() {
        let key = SecretKey::from_bytes([0x11; SECRET_SIZE]);
        let text = key.to_base64();
        assert_eq!(SecretKey::from_base64(&text).unwrap(), key);
    }

    #[test]
    fn secret_key_rejects_wrong_length() {
        let result = SecretKey::from_slice(&[0u8; 31]);
        assert!(matches!(result, Err(CryptoError::InvalidKeyMaterial { .. })));
    }

    #[test]
    fn duplicate_is_independent_copy() {
        let secret = RootSecret::from_bytes([3u8; SECRET_SIZE]);
        let copy = secret.duplicate();
        let expected = secret.public_key();
        secret.dispose();
        assert_eq!(copy.public_key(), expected);
    }
}
