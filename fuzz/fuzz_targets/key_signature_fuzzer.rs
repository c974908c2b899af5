//! Fuzz target for domain key signature verification
//!
//! A key is only ever re-encrypted after its unwrapped secret verifies the
//! record's own signature, so forging or bending a signature must never get
//! a record through.
//!
//! # Strategy
//!
//! - Corrupted signatures: flip one bit of a valid signature
//! - Wrong secret: verify with a secret other than the signer
//! - Tampered fields: alter domains, version or peer key after signing
//! - Batch decrypt: feed the tampered record to `decrypt_batch`
//!
//! # Invariants
//!
//! - Untouched signature MUST verify
//! - Any of the above alterations MUST fail verification
//! - `decrypt_batch` MUST NOT return a tampered record
//! - `key_id` MUST change when the signature bytes change

#![no_main]

use std::collections::BTreeMap;

use arbitrary::Arbitrary;
use grille_core::decrypt_batch;
use grille_crypto::{DomainKeySignature, RootSecret, SecretKey, WrapEntropy, wrap_for_ca};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
struct FuzzInput {
    root: [u8; 32],
    secret: [u8; 32],
    ephemeral: [u8; 32],
    nonce: [u8; 24],
    domains: Vec<String>,
    attack: SignatureAttack,
}

#[derive(Debug, Clone, Arbitrary)]
enum SignatureAttack {
    CorruptedSignature { byte_offset: u8, bit_offset: u8 },
    WrongSecret { other: [u8; 32] },
    ExtraDomain(String),
    Version(u32),
    PeerKey { byte_offset: u8, mask: u8 },
}

fuzz_target!(|input: FuzzInput| {
    let mut domains: Vec<String> = input.domains.into_iter().take(8).collect();
    if domains.is_empty() {
        domains.push("MaitreDesCles".to_string());
    }

    let root = RootSecret::from_bytes(input.root);
    let secret = SecretKey::from_bytes(input.secret);
    let entropy = WrapEntropy { ephemeral: input.ephemeral, nonce: input.nonce };
    let Ok((peer, ca_encrypted)) = wrap_for_ca(&root.public_key(), &secret, &entropy) else {
        // Low-order ephemeral keys are refused up front
        return;
    };

    let signature = DomainKeySignature::sign(
        domains.clone(),
        DomainKeySignature::VERSION,
        peer,
        ca_encrypted.clone(),
        &secret,
    )
    .unwrap();
    assert!(signature.verify(&secret).is_ok());

    let tampered = match input.attack {
        SignatureAttack::CorruptedSignature { byte_offset, bit_offset } => {
            let mut bytes = *signature.signature();
            bytes[byte_offset as usize % 64] ^= 1 << (bit_offset % 8);
            let tampered = DomainKeySignature::from_parts(
                domains,
                DomainKeySignature::VERSION,
                peer,
                ca_encrypted,
                bytes,
            )
            .unwrap();
            assert_ne!(tampered.key_id(), signature.key_id());
            tampered
        },
        SignatureAttack::WrongSecret { other } => {
            if other != input.secret {
                assert!(signature.verify(&SecretKey::from_bytes(other)).is_err());
            }
            return;
        },
        SignatureAttack::ExtraDomain(domain) => {
            domains.push(domain);
            DomainKeySignature::from_parts(
                domains,
                DomainKeySignature::VERSION,
                peer,
                ca_encrypted,
                *signature.signature(),
            )
            .unwrap()
        },
        SignatureAttack::Version(version) => {
            if version == DomainKeySignature::VERSION {
                return;
            }
            DomainKeySignature::from_parts(domains, version, peer, ca_encrypted, *signature.signature())
                .unwrap()
        },
        SignatureAttack::PeerKey { byte_offset, mask } => {
            if mask == 0 {
                return;
            }
            let mut altered = peer;
            altered[byte_offset as usize % 32] ^= mask;
            DomainKeySignature::from_parts(
                domains,
                DomainKeySignature::VERSION,
                altered,
                ca_encrypted,
                *signature.signature(),
            )
            .unwrap()
        },
    };

    assert!(tampered.verify(&secret).is_err(), "tampered signature verified");

    let records = BTreeMap::from([(tampered.key_id(), tampered)]);
    let outcome = decrypt_batch(&root, &records, None);
    assert!(outcome.recovered.is_empty(), "tampered record recovered");
});
