//! Certificates and certificate chains.
//!
//! A [`Certificate`] binds a subject (an instance id), its roles and domains
//! to an Ed25519 public key, signed by an issuer key. Chains are ordered leaf
//! first; the last certificate must be issued by the CA anchor, which is the
//! root secret's public key.
//!
//! Certificates travel as multibase-encoded CBOR strings.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    CryptoError,
    encoding::{decode_multibase, encode_multibase},
    wrap::agreement_public_key,
};

/// Label prefixed to the to-be-signed certificate body.
const CERTIFICATE_LABEL: &[u8] = b"grille-certificate-v1";

/// Public key fingerprint: hex SHA-256 of the Ed25519 public key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of a verifying key.
    pub fn of(key: &VerifyingKey) -> Self {
        Self(hex::encode(Sha256::digest(key.as_bytes())))
    }

    /// Wrap a fingerprint received from the wire.
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Fingerprint text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A signed binding of subject, roles and domains to a public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    subject: String,
    roles: Vec<String>,
    domains: Vec<String>,
    public_key: [u8; 32],
    issuer: [u8; 32],
    signature: Vec<u8>,
}

impl Certificate {
    /// Issue a certificate for `public_key`, signed by `issuer`.
    pub fn issue(
        subject: impl Into<String>,
        roles: Vec<String>,
        domains: Vec<String>,
        public_key: &VerifyingKey,
        issuer: &SigningKey,
    ) -> Self {
        let mut certificate = Self {
            subject: subject.into(),
            roles,
            domains,
            public_key: public_key.to_bytes(),
            issuer: issuer.verifying_key().to_bytes(),
            signature: Vec::new(),
        };
        certificate.signature = issuer.sign(&certificate.tbs_message()).to_bytes().to_vec();
        certificate
    }

    /// Check that `issuer` signed this certificate.
    pub fn verify_issued_by(&self, issuer: &VerifyingKey) -> Result<(), CryptoError> {
        if self.issuer != issuer.to_bytes() {
            return Err(CryptoError::certificate(format!(
                "certificate for {} names a different issuer",
                self.subject
            )));
        }

        let signature: [u8; 64] = self.signature.as_slice().try_into().map_err(|_| {
            CryptoError::certificate(format!("signature must be 64 bytes, got {}", self.signature.len()))
        })?;

        issuer
            .verify_strict(&self.tbs_message(), &Signature::from_bytes(&signature))
            .map_err(|_| CryptoError::certificate(format!("bad signature on {}", self.subject)))
    }

    /// Subject (instance id).
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Roles granted to the subject.
    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// Domains the subject serves.
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// Whether `role` is granted.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Parsed Ed25519 public key.
    pub fn public_key(&self) -> Result<VerifyingKey, CryptoError> {
        VerifyingKey::from_bytes(&self.public_key)
            .map_err(|e| CryptoError::key_material(format!("certificate public key: {e}")))
    }

    /// Fingerprint of the certified public key.
    pub fn fingerprint(&self) -> Result<Fingerprint, CryptoError> {
        Ok(Fingerprint::of(&self.public_key()?))
    }

    /// X25519 key to encrypt secrets for this subject.
    pub fn encryption_key(&self) -> Result<[u8; 32], CryptoError> {
        Ok(agreement_public_key(&self.public_key()?))
    }

    /// Multibase(CBOR) text form.
    pub fn encode(&self) -> Result<String, CryptoError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| CryptoError::Encoding(format!("certificate encoding: {e}")))?;
        Ok(encode_multibase(&bytes))
    }

    /// Parse the text form produced by [`Self::encode`].
    pub fn decode(text: &str) -> Result<Self, CryptoError> {
        let bytes = decode_multibase(text)?;
        ciborium::from_reader(bytes.as_slice())
            .map_err(|e| CryptoError::Encoding(format!("certificate decoding: {e}")))
    }

    fn tbs_message(&self) -> Vec<u8> {
        let mut message = Vec::with_capacity(CERTIFICATE_LABEL.len() + 128);
        message.extend_from_slice(CERTIFICATE_LABEL);
        push_str(&mut message, &self.subject);
        push_list(&mut message, &self.roles);
        push_list(&mut message, &self.domains);
        message.extend_from_slice(&self.public_key);
        message.extend_from_slice(&self.issuer);
        message
    }
}

fn push_str(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
    buf.extend_from_slice(value.as_bytes());
}

fn push_list(buf: &mut Vec<u8>, values: &[String]) {
    buf.extend_from_slice(&(values.len() as u32).to_be_bytes());
    for value in values {
        push_str(buf, value);
    }
}

/// Leaf-first certificate chain ending at a certificate issued by the anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateChain(Vec<Certificate>);

impl CertificateChain {
    /// Build from leaf-first certificates.
    pub fn new(certificates: Vec<Certificate>) -> Self {
        Self(certificates)
    }

    /// Parse a chain of encoded certificates.
    pub fn decode(encoded: &[String]) -> Result<Self, CryptoError> {
        encoded.iter().map(|text| Certificate::decode(text)).collect::<Result<Vec<_>, _>>().map(Self)
    }

    /// Encode every certificate, leaf first.
    pub fn encode(&self) -> Result<Vec<String>, CryptoError> {
        self.0.iter().map(Certificate::encode).collect()
    }

    /// Leaf certificate, if any.
    pub fn leaf(&self) -> Option<&Certificate> {
        self.0.first()
    }

    /// Verify every link up to `anchor` and return the leaf.
    ///
    /// # Errors
    ///
    /// - `InvalidCertificate` if the chain is empty, a link's issuer does not
    ///   match the next certificate, a signature fails, or the last
    ///   certificate was not issued by the anchor
    pub fn verify(&self, anchor: &VerifyingKey) -> Result<&Certificate, CryptoError> {
        let Some(leaf) = self.0.first() else {
            return Err(CryptoError::certificate("empty certificate chain"));
        };

        for pair in self.0.windows(2) {
            let issuer = pair[1].public_key()?;
            pair[0].verify_issued_by(&issuer)?;
        }

        if let Some(last) = self.0.last() {
            last.verify_issued_by(anchor)?;
        }

        Ok(leaf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ca() -> SigningKey {
        SigningKey::from_bytes(&[1u8; 32])
    }

    fn custodian_key() -> SigningKey {
        SigningKey::from_bytes(&[2u8; 32])
    }

    fn leaf(issuer: &SigningKey) -> Certificate {
        Certificate::issue(
            "instance-a",
            vec!["maitredescles".to_string()],
            vec!["MaitreDesCles".to_string()],
            &custodian_key().verifying_key(),
            issuer,
        )
    }

    #[test]
    fn directly_issued_leaf_verifies() {
        let chain = CertificateChain::new(vec![leaf(&ca())]);
        let verified = chain.verify(&ca().verifying_key()).unwrap();
        assert_eq!(verified.subject(), "instance-a");
    }

    #[test]
    fn intermediate_chain_verifies() {
        let intermediate_key = SigningKey::from_bytes(&[3u8; 32]);
        let intermediate = Certificate::issue(
            "intermediate",
            vec![],
            vec![],
            &intermediate_key.verifying_key(),
            &ca(),
        );
        let chain = CertificateChain::new(vec![leaf(&intermediate_key), intermediate]);

        assert!(chain.verify(&ca().verifying_key()).is_ok());
    }

    #[test]
    fn foreign_anchor_is_rejected() {
        let rogue = SigningKey::from_bytes(&[9u8; 32]);
        let chain = CertificateChain::new(vec![leaf(&rogue)]);

        assert!(matches!(
            chain.verify(&ca().verifying_key()),
            Err(CryptoError::InvalidCertificate { .. })
        ));
    }

    #[test]
    fn altered_roles_break_signature() {
        let mut certificate = leaf(&ca());
        certificate.roles.push("admin".to_string());

        let chain = CertificateChain::new(vec![certificate]);
        let result = chain.verify(&ca().verifying_key());
        assert!(matches!(result, Err(CryptoError::InvalidCertificate { .. })));
    }

    #[test]
    fn empty_chain_is_rejected() {
        let chain = CertificateChain::new(vec![]);
        let result = chain.verify(&ca().verifying_key());
        assert!(matches!(result, Err(CryptoError::InvalidCertificate { .. })));
    }

    #[test]
    fn encoded_chain_decodes_to_same_fingerprint() {
        let chain = CertificateChain::new(vec![leaf(&ca())]);
        let decoded = CertificateChain::decode(&chain.encode().unwrap()).unwrap();

        assert_eq!(
            decoded.leaf().unwrap().fingerprint().unwrap(),
            Fingerprint::of(&custodian_key().verifying_key())
        );
    }
}
