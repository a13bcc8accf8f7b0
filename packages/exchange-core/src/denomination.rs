//! The set of denomination keys the exchange currently recognizes.
//!
//! A denomination is one coin value the exchange is willing to mint,
//! identified by the hash of its RSA public key. Rotation and loading
//! from disk are out of scope here (see `SPEC_FULL.md`); this module
//! only models the read side a withdraw request and the closer consult.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::amount::Amount;
use crate::blind_sign::BlindSigner;

/// A single denomination: one coin value, its withdraw fee, its validity
/// window, and the key used to blind-sign coins of this denomination.
pub struct Denomination {
    pub denom_pub_hash: [u8; 64],
    pub value: Amount,
    pub fee_withdraw: Amount,
    pub valid_from: DateTime<Utc>,
    pub expire_withdraw: DateTime<Utc>,
    pub expire_deposit: DateTime<Utc>,
    pub expire_legal: DateTime<Utc>,
    /// Set once the exchange has revoked this key (e.g. after a suspected
    /// compromise); coins already withdrawn become recoupable and no new
    /// withdrawals are accepted, distinct from the key simply expiring.
    pub recoup_possible: bool,
    pub signer: Arc<dyn BlindSigner>,
}

/// Whether a denomination may currently be used to withdraw a new coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenominationStatus {
    Valid,
    /// `now >= expire_withdraw`.
    Expired,
    /// `now < valid_from`.
    NotYetValid,
    /// `recoup_possible` is set: the key has been revoked.
    Revoked,
}

impl Denomination {
    /// Evaluate withdrawability at `now`, checked in the order the
    /// exchange applies them: an expired key is reported as expired even
    /// if it was later revoked, and revocation is only checked once the
    /// key is inside its validity window.
    pub fn status_at(&self, now: DateTime<Utc>) -> DenominationStatus {
        if now >= self.expire_withdraw {
            DenominationStatus::Expired
        } else if now < self.valid_from {
            DenominationStatus::NotYetValid
        } else if self.recoup_possible {
            DenominationStatus::Revoked
        } else {
            DenominationStatus::Valid
        }
    }
}

impl std::fmt::Debug for Denomination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Denomination")
            .field("denom_pub_hash", &hex::encode(self.denom_pub_hash))
            .field("value", &self.value.to_string())
            .field("fee_withdraw", &self.fee_withdraw.to_string())
            .field("valid_from", &self.valid_from)
            .field("expire_withdraw", &self.expire_withdraw)
            .finish()
    }
}

/// Read-only lookup of denominations by public-key hash. A handler
/// obtains one snapshot at the start of a request and consults it for
/// the rest of that request's lifetime, so a concurrent key rotation
/// never produces an inconsistent view mid-request.
pub trait DenominationDirectory: Send + Sync {
    fn lookup(&self, denom_pub_hash: &[u8; 64]) -> Option<Arc<Denomination>>;
}

/// A fixed in-memory snapshot of the denomination set. The caller
/// replaces the whole snapshot atomically (e.g. behind an `ArcSwap` or
/// by re-fetching `Arc<InMemoryDenominationDirectory>` from shared
/// state) between requests; within one snapshot the set never changes.
#[derive(Default)]
pub struct InMemoryDenominationDirectory {
    by_hash: HashMap<[u8; 64], Arc<Denomination>>,
}

impl InMemoryDenominationDirectory {
    pub fn new(denominations: Vec<Denomination>) -> Self {
        let by_hash = denominations
            .into_iter()
            .map(|d| (d.denom_pub_hash, Arc::new(d)))
            .collect();
        Self { by_hash }
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

impl DenominationDirectory for InMemoryDenominationDirectory {
    fn lookup(&self, denom_pub_hash: &[u8; 64]) -> Option<Arc<Denomination>> {
        self.by_hash.get(denom_pub_hash).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blind_sign::RsaBlindSigner;
    use chrono::Duration;
    use rsa::{rand_core::OsRng, RsaPrivateKey};

    fn sample_denomination(hash_byte: u8) -> Denomination {
        let private_key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let signer = Arc::new(RsaBlindSigner::new(private_key).unwrap());
        let now = Utc::now();
        Denomination {
            denom_pub_hash: [hash_byte; 64],
            value: Amount::from_parts("EUR", 1, 0).unwrap(),
            fee_withdraw: Amount::zero("EUR").unwrap(),
            valid_from: now - Duration::hours(1),
            expire_withdraw: now + Duration::hours(1),
            expire_deposit: now + Duration::days(30),
            expire_legal: now + Duration::days(3650),
            recoup_possible: false,
            signer,
        }
    }

    #[test]
    fn looks_up_known_and_unknown_hashes() {
        let dir = InMemoryDenominationDirectory::new(vec![sample_denomination(1), sample_denomination(2)]);
        assert!(dir.lookup(&[1u8; 64]).is_some());
        assert!(dir.lookup(&[1u8; 64]).unwrap().value.to_string() == "EUR:1");
        assert!(dir.lookup(&[9u8; 64]).is_none());
    }

    #[test]
    fn withdrawable_window_is_half_open() {
        let d = sample_denomination(1);
        assert_eq!(d.status_at(Utc::now()), DenominationStatus::Valid);
        assert_eq!(d.status_at(d.expire_withdraw), DenominationStatus::Expired);
        assert_eq!(d.status_at(d.valid_from), DenominationStatus::Valid);
    }

    #[test]
    fn not_yet_valid_takes_priority_over_revoked() {
        let mut d = sample_denomination(1);
        d.recoup_possible = true;
        assert_eq!(
            d.status_at(d.valid_from - Duration::minutes(1)),
            DenominationStatus::NotYetValid
        );
        assert_eq!(d.status_at(d.valid_from), DenominationStatus::Revoked);
    }

    #[test]
    fn expired_takes_priority_over_revoked() {
        let mut d = sample_denomination(1);
        d.recoup_possible = true;
        assert_eq!(d.status_at(d.expire_withdraw), DenominationStatus::Expired);
    }
}
