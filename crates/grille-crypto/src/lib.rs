//! MilleGrilles Key Recovery Cryptography
//!
//! Cryptographic building blocks for recovering domain secret keys with the
//! operator's root secret. Pure functions with deterministic outputs. Callers
//! provide random bytes for deterministic testing.
//!
//! # Key Hierarchy
//!
//! ```text
//! Master key file ──Argon2id + AEAD──▶ RootSecret (CA private key)
//!                                          │
//!                    X25519(root, peer) + HKDF + AEAD
//!                                          ▼
//!                     CA-wrapped record ─▶ SecretKey ──verify──▶ DomainKeySignature
//!                                          │
//!                    X25519(ephemeral, custodian) + HKDF + AEAD
//!                                          ▼
//!                          one ciphertext per recipient certificate
//! ```
//!
//! # Security
//!
//! Provenance:
//! - Each wrapped key is self-signed by the secret it wraps
//! - A record is trusted only after the unwrapped secret verifies it
//!
//! Secret hygiene:
//! - `RootSecret` and `SecretKey` zeroize on drop and redact `Debug`
//! - Plaintext buffers are returned as `Zeroizing<Vec<u8>>`
//!
//! Recipient trust:
//! - Recipients are certificate chains verified against the CA anchor
//! - Non-contributory (low-order) key agreements are rejected

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod certificate;
pub mod encoding;
mod error;
pub mod secret;
pub mod signature;
pub mod wrap;

pub use certificate::{Certificate, CertificateChain, Fingerprint};
pub use error::CryptoError;
pub use secret::{
    EncryptedKeyMaterial, KdfParams, RootSecret, SECRET_SIZE, SecretKey, load_root_secret,
    seal_root_secret,
};
pub use signature::{DomainKeySignature, KeyId, RawDomainKeySignature};
pub use wrap::{
    WrapEntropy, decrypt_for_recipient, decrypt_with_root, encrypt_for_recipient, unwrap_from_ca,
    wrap_for_ca,
};
