//! EdDSA signature verification over the exchange's "purpose" blobs, and
//! the hashes used to identify denominations and coin envelopes.
//!
//! Every signed request carries a purpose header (`size`, `purpose` tag)
//! followed by the fields being attested to, mirroring the original's
//! `GNUNET_CRYPTO_EccSignaturePurpose`-prefixed structs. Signing the
//! header along with the payload prevents a signature created for one
//! purpose from being replayed as a signature for another.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha512};
use thiserror::Error;

use crate::amount::Amount;

/// Purpose tag for a wallet's withdraw request, matching the original's
/// `TALER_SIGNATURE_WALLET_RESERVE_WITHDRAW`.
pub const PURPOSE_WALLET_RESERVE_WITHDRAW: u32 = 1200;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("malformed public key")]
    MalformedPublicKey,
    #[error("malformed signature")]
    MalformedSignature,
    #[error("signature does not verify")]
    InvalidSignature,
}

/// A raw Ed25519 public key, as used for reserve public keys.
pub type ReservePublicKeyBytes = [u8; 32];
/// A raw Ed25519 signature.
pub type SignatureBytes = [u8; 64];

/// `SHA-512` hash of a DER-encoded RSA denomination public key, matching
/// the original's use of `GNUNET_CRYPTO_hash` over the public key
/// representation for `denom_pub_hash`.
pub fn hash_denomination_public_key(der_bytes: &[u8]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(der_bytes);
    hasher.finalize().into()
}

/// `SHA-512` hash of a blinded coin envelope, used as `h_coin_envelope`.
pub fn hash_coin_envelope(blinded_envelope: &[u8]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(blinded_envelope);
    hasher.finalize().into()
}

/// The purpose-signed payload of a wallet withdraw request:
/// `reserve_pub` signs over `(reserve_pub, amount_with_fee, h_denom_pub,
/// h_coin_envelope)`, in that order.
pub struct WithdrawRequestPurpose<'a> {
    pub reserve_pub: &'a [u8; 32],
    pub amount_with_fee: Amount,
    pub h_denom_pub: &'a [u8; 64],
    pub h_coin_envelope: &'a [u8; 64],
}

impl<'a> WithdrawRequestPurpose<'a> {
    /// Serialize in the exact byte layout that was signed: a purpose
    /// header (4-byte big-endian size, 4-byte big-endian purpose tag)
    /// followed by the attested fields, each in network byte order:
    /// `reserve_pub, amount_with_fee, h_denom_pub, h_coin_envelope`.
    pub fn to_signed_bytes(&self) -> Vec<u8> {
        let nbo_amount = self.amount_with_fee.hton().to_bytes();
        let body_len = 32 + nbo_amount.len() + 64 + 64;
        let size = 4 + 4 + body_len;

        let mut buf = Vec::with_capacity(size);
        buf.extend_from_slice(&(size as u32).to_be_bytes());
        buf.extend_from_slice(&PURPOSE_WALLET_RESERVE_WITHDRAW.to_be_bytes());
        buf.extend_from_slice(self.reserve_pub);
        buf.extend_from_slice(&nbo_amount);
        buf.extend_from_slice(self.h_denom_pub);
        buf.extend_from_slice(self.h_coin_envelope);
        buf
    }
}

/// Verify that `signature` was produced by `reserve_pub` over `purpose`.
pub fn verify_withdraw_request(
    reserve_pub: &ReservePublicKeyBytes,
    signature: &SignatureBytes,
    purpose: &WithdrawRequestPurpose<'_>,
) -> Result<(), CryptoError> {
    let key = VerifyingKey::from_bytes(reserve_pub).map_err(|_| CryptoError::MalformedPublicKey)?;
    let sig = Signature::from_bytes(signature);
    key.verify(&purpose.to_signed_bytes(), &sig)
        .map_err(|_| CryptoError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    #[test]
    fn signs_and_verifies() {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let verifying_key = signing_key.verifying_key();

        let amount = Amount::from_parts("EUR", 10, 0).unwrap();
        let reserve_pub = verifying_key.to_bytes();
        let purpose = WithdrawRequestPurpose {
            reserve_pub: &reserve_pub,
            h_denom_pub: &[1u8; 64],
            h_coin_envelope: &[2u8; 64],
            amount_with_fee: amount,
        };
        let sig: Signature = signing_key.sign(&purpose.to_signed_bytes());

        verify_withdraw_request(
            &verifying_key.to_bytes(),
            &sig.to_bytes(),
            &purpose,
        )
        .unwrap();
    }

    #[test]
    fn rejects_tampered_amount() {
        let signing_key = SigningKey::from_bytes(&[9u8; 32]);
        let verifying_key = signing_key.verifying_key();

        let reserve_pub = verifying_key.to_bytes();
        let purpose = WithdrawRequestPurpose {
            reserve_pub: &reserve_pub,
            h_denom_pub: &[1u8; 64],
            h_coin_envelope: &[2u8; 64],
            amount_with_fee: Amount::from_parts("EUR", 10, 0).unwrap(),
        };
        let sig: Signature = signing_key.sign(&purpose.to_signed_bytes());

        let tampered = WithdrawRequestPurpose {
            amount_with_fee: Amount::from_parts("EUR", 11, 0).unwrap(),
            ..purpose
        };

        let err = verify_withdraw_request(&verifying_key.to_bytes(), &sig.to_bytes(), &tampered)
            .unwrap_err();
        assert!(matches!(err, CryptoError::InvalidSignature));
    }
}
