//! Domain key signatures.
//!
//! A [`DomainKeySignature`] records the provenance of one CA-wrapped secret
//! key: which domains may use it, the format version, the ephemeral public
//! key it was wrapped with, and the wrapped bytes themselves. The signature
//! covers `(domains, version, peer_public_key)` and is produced by the very
//! secret key being wrapped, used as an Ed25519 seed. Once the key has been
//! unwrapped, verifying the signature with it proves the record was not
//! altered after signing.
//!
//! Records arrive as loosely typed wire values ([`RawDomainKeySignature`]).
//! They become a [`DomainKeySignature`] only through an explicit, validating
//! conversion.

use ed25519_dalek::{Signature, Signer};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    CryptoError, SecretKey,
    encoding::{decode_multibase, encode_multibase},
};

/// Label prefixed to every signed message.
const SIGNATURE_LABEL: &[u8] = b"grille-domain-key-v1";

/// Label prefixed to the key id digest input.
const KEY_ID_LABEL: &[u8] = b"grille-key-id-v1";

/// Stable identifier of a wrapped key: hex SHA-256 over the whole record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    /// Wrap an identifier received from a remote store.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signed provenance of one CA-wrapped secret key.
///
/// # Invariants
///
/// - `domains` is non-empty
/// - `signature` was produced over `(domains, version, peer_public_key)` by
///   the secret that `ca_encrypted` wraps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDomainKeySignature", into = "RawDomainKeySignature")]
pub struct DomainKeySignature {
    domains: Vec<String>,
    version: u32,
    peer_public_key: [u8; 32],
    ca_encrypted: Vec<u8>,
    signature: [u8; 64],
}

impl DomainKeySignature {
    /// Current signature format version.
    pub const VERSION: u32 = 1;

    /// Sign a freshly wrapped key with the secret it wraps.
    ///
    /// # Errors
    ///
    /// - `EmptyDomains` if no domain is authorized
    pub fn sign(
        domains: Vec<String>,
        version: u32,
        peer_public_key: [u8; 32],
        ca_encrypted: Vec<u8>,
        secret: &SecretKey,
    ) -> Result<Self, CryptoError> {
        if domains.is_empty() {
            return Err(CryptoError::EmptyDomains);
        }

        let message = signed_message(&domains, version, &peer_public_key);
        let signature = secret.signing_key().sign(&message).to_bytes();

        Ok(Self { domains, version, peer_public_key, ca_encrypted, signature })
    }

    /// Build from already decoded parts without verifying the signature.
    ///
    /// # Errors
    ///
    /// - `EmptyDomains` if no domain is authorized
    pub fn from_parts(
        domains: Vec<String>,
        version: u32,
        peer_public_key: [u8; 32],
        ca_encrypted: Vec<u8>,
        signature: [u8; 64],
    ) -> Result<Self, CryptoError> {
        if domains.is_empty() {
            return Err(CryptoError::EmptyDomains);
        }
        Ok(Self { domains, version, peer_public_key, ca_encrypted, signature })
    }

    /// Verify the signature using the unwrapped secret.
    ///
    /// # Errors
    ///
    /// - `SignatureMismatch` if any signed field was altered or the secret
    ///   is not the one that signed
    pub fn verify(&self, secret: &SecretKey) -> Result<(), CryptoError> {
        let message = signed_message(&self.domains, self.version, &self.peer_public_key);
        let signature = Signature::from_bytes(&self.signature);

        secret
            .signing_key()
            .verifying_key()
            .verify_strict(&message, &signature)
            .map_err(|_| CryptoError::SignatureMismatch)
    }

    /// Derived identifier, unique per distinct record.
    ///
    /// Covers the signed fields, the wrapped bytes and the signature, so two
    /// records differing only in `ca_encrypted` get different ids.
    pub fn key_id(&self) -> KeyId {
        let mut hasher = Sha256::new();
        hasher.update(KEY_ID_LABEL);
        hasher.update(signed_message(&self.domains, self.version, &self.peer_public_key));
        hasher.update((self.ca_encrypted.len() as u32).to_be_bytes());
        hasher.update(&self.ca_encrypted);
        hasher.update(self.signature);
        KeyId(hex::encode(hasher.finalize()))
    }

    /// Whether `domain` may use this key.
    pub fn authorizes(&self, domain: &str) -> bool {
        self.domains.iter().any(|d| d == domain)
    }

    /// Authorized domains.
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// Format version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Ephemeral X25519 public key used to wrap for the CA.
    pub fn peer_public_key(&self) -> &[u8; 32] {
        &self.peer_public_key
    }

    /// Secret key wrapped for the CA (`nonce || ciphertext`).
    pub fn ca_encrypted(&self) -> &[u8] {
        &self.ca_encrypted
    }

    /// Raw Ed25519 signature bytes.
    pub fn signature(&self) -> &[u8; 64] {
        &self.signature
    }
}

/// Canonical signed message: label, version, length-prefixed domains, peer key.
fn signed_message(domains: &[String], version: u32, peer_public_key: &[u8; 32]) -> Vec<u8> {
    let domains_len: usize = domains.iter().map(|d| 4 + d.len()).sum();
    let mut message =
        Vec::with_capacity(SIGNATURE_LABEL.len() + 4 + 4 + domains_len + peer_public_key.len());

    message.extend_from_slice(SIGNATURE_LABEL);
    message.extend_from_slice(&version.to_be_bytes());
    message.extend_from_slice(&(domains.len() as u32).to_be_bytes());
    for domain in domains {
        message.extend_from_slice(&(domain.len() as u32).to_be_bytes());
        message.extend_from_slice(domain.as_bytes());
    }
    message.extend_from_slice(peer_public_key);

    message
}

/// Wire form of a [`DomainKeySignature`], binary fields multibase encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDomainKeySignature {
    /// Authorized domains
    pub domains: Vec<String>,
    /// Format version
    pub version: u32,
    /// Multibase ephemeral public key
    pub peer_public_key: String,
    /// Multibase CA-wrapped secret
    pub ca_encrypted: String,
    /// Multibase signature
    pub signature: String,
}

impl TryFrom<RawDomainKeySignature> for DomainKeySignature {
    type Error = CryptoError;

    fn try_from(raw: RawDomainKeySignature) -> Result<Self, Self::Error> {
        let peer_public_key: [u8; 32] =
            decode_multibase(&raw.peer_public_key)?.try_into().map_err(|v: Vec<u8>| {
                CryptoError::key_material(format!("peer public key must be 32 bytes, got {}", v.len()))
            })?;
        let signature: [u8; 64] =
            decode_multibase(&raw.signature)?.try_into().map_err(|v: Vec<u8>| {
                CryptoError::Encoding(format!("signature must be 64 bytes, got {}", v.len()))
            })?;
        let ca_encrypted = decode_multibase(&raw.ca_encrypted)?;

        Self::from_parts(raw.domains, raw.version, peer_public_key, ca_encrypted, signature)
    }
}

impl From<DomainKeySignature> for RawDomainKeySignature {
    fn from(signature: DomainKeySignature) -> Self {
        Self {
            peer_public_key: encode_multibase(&signature.peer_public_key),
            ca_encrypted: encode_multibase(&signature.ca_encrypted),
            signature: encode_multibase(&signature.signature),
            domains: signature.domains,
            version: signature.version,
        }
    }
}
