//! Blind-signature issuance.
//!
//! The exchange never sees the coin it is signing: the wallet blinds the
//! coin's public representation before sending it over, and the
//! denomination's private key is applied via raw RSA exponentiation
//! (`c = m^d mod n`, no padding) rather than a padded signature scheme.
//! The wallet alone knows the blinding factor and can unblind `c` into a
//! signature over the original coin.

use rsa::pkcs8::EncodePublicKey;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignError {
    #[error("blinded message is not smaller than the RSA modulus")]
    MessageTooLarge,
    #[error("denomination key could not be DER-encoded")]
    KeyEncoding,
}

/// Issues a raw RSA blind signature for a single denomination.
///
/// Object-safe so a [`crate::denomination::Denomination`] can hold one
/// behind `Arc<dyn BlindSigner>` without the directory needing to know
/// the concrete key type.
pub trait BlindSigner: Send + Sync {
    /// Sign a wallet-blinded coin message, returning the blinded signature.
    /// The caller is responsible for the wallet later unblinding it.
    fn sign_blinded(&self, blinded_message: &[u8]) -> Result<Vec<u8>, SignError>;

    /// DER encoding of the public key, hashed by callers to obtain the
    /// denomination's `denom_pub_hash`.
    fn public_key_der(&self) -> &[u8];
}

/// An RSA denomination key pair used to issue blind signatures for one
/// specific coin value.
pub struct RsaBlindSigner {
    private_key: RsaPrivateKey,
    public_key_der: Vec<u8>,
}

impl RsaBlindSigner {
    pub fn new(private_key: RsaPrivateKey) -> Result<Self, SignError> {
        let public_key = RsaPublicKey::from(&private_key);
        let der = public_key
            .to_public_key_der()
            .map_err(|_| SignError::KeyEncoding)?;
        Ok(Self {
            private_key,
            public_key_der: der.as_bytes().to_vec(),
        })
    }
}

impl BlindSigner for RsaBlindSigner {
    fn sign_blinded(&self, blinded_message: &[u8]) -> Result<Vec<u8>, SignError> {
        let n = self.private_key.n();
        let d = self.private_key.d();
        let m = BigUint::from_bytes_be(blinded_message);
        if &m >= n {
            return Err(SignError::MessageTooLarge);
        }
        let c = m.modpow(d, n);

        let key_len = n.bits().div_ceil(8) as usize;
        let raw = c.to_bytes_be();
        let mut out = vec![0u8; key_len];
        out[key_len - raw.len()..].copy_from_slice(&raw);
        Ok(out)
    }

    fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::rand_core::OsRng;

    #[test]
    fn signs_a_blinded_message_smaller_than_the_modulus() {
        let private_key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let signer = RsaBlindSigner::new(private_key).unwrap();

        let message = vec![0x42u8; 64]; // well under a 1024-bit modulus
        let sig = signer.sign_blinded(&message).unwrap();
        assert_eq!(sig.len() * 8, 1024);
    }

    #[test]
    fn rejects_message_not_smaller_than_modulus() {
        let private_key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let n_bytes = private_key.n().to_bytes_be();
        let signer = RsaBlindSigner::new(private_key).unwrap();

        let err = signer.sign_blinded(&n_bytes).unwrap_err();
        assert!(matches!(err, SignError::MessageTooLarge));
    }
}
