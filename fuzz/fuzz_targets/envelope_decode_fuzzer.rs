//! Fuzz target for decoding untrusted envelopes
//!
//! Everything the pipeline reads from the bus, the key store or a backup
//! host arrives as text or bytes chosen by someone else.
//!
//! # Strategy
//!
//! - Multibase text: arbitrary strings with and without the `m` prefix
//! - Signature JSON: arbitrary objects shaped like a domain key signature
//! - Certificate chains: arbitrary encoded certificates
//! - Ciphertexts: arbitrary bytes into every decrypt path
//! - Master key material: arbitrary sealed root secrets
//!
//! # Invariants
//!
//! - NEVER panic on malformed input
//! - Decrypting arbitrary bytes MUST fail (AEAD tag) unless they are a
//!   genuine ciphertext, which random input never is
//! - Decoded signatures MUST re-encode to an equivalent value

#![no_main]

use arbitrary::Arbitrary;
use ed25519_dalek::SigningKey;
use grille_crypto::{
    Certificate, CertificateChain, DomainKeySignature, EncryptedKeyMaterial, KdfParams,
    RootSecret, SecretKey, decrypt_with_root,
    encoding::{decode_multibase, encode_multibase},
    load_root_secret, unwrap_from_ca,
    wrap::open_payload,
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
enum Envelope {
    Multibase(String),
    SignatureJson { domains: Vec<String>, version: u32, fields: [String; 3] },
    Certificate(String),
    Chain(Vec<String>),
    Ciphertext { peer: [u8; 32], bytes: Vec<u8> },
    Payload(Vec<u8>),
    MasterKey { salt: Vec<u8>, nonce: Vec<u8>, ciphertext: Vec<u8> },
}

fuzz_target!(|envelope: Envelope| {
    let root = RootSecret::from_bytes([0x42; 32]);

    match envelope {
        Envelope::Multibase(text) => {
            if let Ok(bytes) = decode_multibase(&text) {
                assert_eq!(decode_multibase(&encode_multibase(&bytes)).unwrap(), bytes);
            }
        },
        Envelope::SignatureJson { domains, version, fields } => {
            let json = serde_json::json!({
                "domains": domains,
                "version": version,
                "peerPublicKey": fields[0],
                "caEncrypted": fields[1],
                "signature": fields[2],
            });
            if let Ok(signature) = serde_json::from_value::<DomainKeySignature>(json) {
                assert!(!signature.domains().is_empty());
                let again: DomainKeySignature =
                    serde_json::from_value(serde_json::to_value(&signature).unwrap()).unwrap();
                assert_eq!(again.key_id(), signature.key_id());
            }
        },
        Envelope::Certificate(text) => {
            if let Ok(certificate) = Certificate::decode(&text) {
                let anchor = SigningKey::from_bytes(&[0x42; 32]).verifying_key();
                let _ = certificate.verify_issued_by(&anchor);
                let _ = certificate.fingerprint();
            }
        },
        Envelope::Chain(encoded) => {
            if let Ok(chain) = CertificateChain::decode(&encoded) {
                assert!(chain.verify(&root.public_key()).is_err(), "forged chain verified");
            }
        },
        Envelope::Ciphertext { peer, bytes } => {
            assert!(unwrap_from_ca(&root, &peer, &bytes).is_err());
            assert!(decrypt_with_root(&root, &bytes).is_err());
        },
        Envelope::Payload(bytes) => {
            assert!(open_payload(&SecretKey::from_bytes([7; 32]), &bytes).is_err());
        },
        Envelope::MasterKey { salt, nonce, ciphertext } => {
            let material = EncryptedKeyMaterial {
                kdf: KdfParams { memory_kib: 8, iterations: 1, parallelism: 1 },
                salt,
                nonce,
                ciphertext,
            };
            let _ = load_root_secret(&material, b"password");
        },
    }
});
