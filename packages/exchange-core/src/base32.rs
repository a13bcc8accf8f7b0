//! Crockford base32 encoding for public keys, hashes, and identifiers
//! exchanged over HTTP and embedded in URLs.

use data_encoding::{DecodeError, Specification};
use std::sync::OnceLock;

fn crockford() -> &'static data_encoding::Encoding {
    static ENCODING: OnceLock<data_encoding::Encoding> = OnceLock::new();
    ENCODING.get_or_init(|| {
        let mut spec = Specification::new();
        spec.symbols.push_str("0123456789ABCDEFGHJKMNPQRSTVWXYZ");
        spec.encoding().expect("crockford base32 spec is valid")
    })
}

/// Encode raw bytes as an upper-case Crockford base32 string, no padding.
pub fn encode(bytes: &[u8]) -> String {
    crockford().encode(bytes)
}

/// Decode a Crockford base32 string back to raw bytes. Case-insensitive.
pub fn decode(s: &str) -> Result<Vec<u8>, DecodeError> {
    crockford().decode(s.to_ascii_uppercase().as_bytes())
}

/// Decode into a fixed-size array, rejecting inputs of the wrong length.
pub fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], Base32Error> {
    let bytes = decode(s).map_err(Base32Error::Decode)?;
    bytes.try_into().map_err(|v: Vec<u8>| Base32Error::WrongLength {
        expected: N,
        actual: v.len(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum Base32Error {
    #[error("invalid crockford base32 encoding: {0}")]
    Decode(#[from] DecodeError),
    #[error("decoded value has length {actual}, expected {expected}")]
    WrongLength { expected: usize, actual: usize },
}
