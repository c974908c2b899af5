//! Multibase text encoding for binary fields.
//!
//! Binary values travel as multibase base64 strings: a single `'m'` prefix
//! followed by standard-alphabet base64 without padding. The prefix is the
//! "encoding byte" custodians attach to wrapped secrets.

use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};

use crate::CryptoError;

/// Multibase prefix for standard base64 without padding.
pub const MULTIBASE_BASE64: char = 'm';

/// Encode bytes as a multibase base64 string.
pub fn encode_multibase(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(1 + bytes.len().div_ceil(3) * 4);
    out.push(MULTIBASE_BASE64);
    STANDARD_NO_PAD.encode_string(bytes, &mut out);
    out
}

/// Decode a multibase base64 string.
///
/// # Errors
///
/// - `Encoding` if the prefix is missing or the body is not valid base64
pub fn decode_multibase(text: &str) -> Result<Vec<u8>, CryptoError> {
    let body = strip_prefix(text)?;
    STANDARD_NO_PAD
        .decode(body)
        .map_err(|e| CryptoError::Encoding(format!("invalid base64 body: {e}")))
}

/// Strip the multibase prefix, returning the base64 body.
pub fn strip_prefix(text: &str) -> Result<&str, CryptoError> {
    text.strip_prefix(MULTIBASE_BASE64).ok_or_else(|| {
        CryptoError::Encoding(format!(
            "expected multibase prefix '{MULTIBASE_BASE64}', got {:?}",
            text.chars().next()
        ))
    })
}

/// Serde adapter storing `Vec<u8>` fields as multibase strings.
pub mod serde_multibase {
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    /// Serialize bytes as a multibase string.
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode_multibase(bytes))
    }

    /// Deserialize bytes from a multibase string.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::decode_multibase(&text).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_value_carries_prefix() {
        let encoded = encode_multibase(b"hello");
        assert!(encoded.starts_with('m'));
        assert_eq!(encoded, "maGVsbG8");
    }

    #[test]
    fn decode_reverses_encode() {
        let bytes: Vec<u8> = (0u8..=255).collect();
        assert_eq!(decode_multibase(&encode_multibase(&bytes)).unwrap(), bytes);
    }

    #[test]
    fn missing_prefix_is_rejected() {
        let result = decode_multibase("aGVsbG8");
        assert!(matches!(result, Err(CryptoError::Encoding(_))));
    }

    #[test]
    fn empty_body_decodes_to_empty() {
        assert_eq!(decode_multibase("m").unwrap(), Vec::<u8>::new());
    }
}
