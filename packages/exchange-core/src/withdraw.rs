//! The withdraw transaction: a wallet presents a blinded coin and a
//! reserve signature, the exchange debits the reserve and hands back a
//! blind signature over the coin.
//!
//! The RSA blind signature is computed *before* the database transaction
//! opens and is reused verbatim across every serialization retry — the
//! signature only depends on the wallet's blinded message and the
//! denomination key, never on the reserve's current balance, so
//! recomputing it on retry would just waste a modular exponentiation
//! without changing the outcome. This mirrors the "optimistic sign, then
//! stash/restore across retries" shape of the original implementation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::amount::Amount;
use crate::base32;
use crate::crypto::{hash_coin_envelope, verify_withdraw_request, WithdrawRequestPurpose};
use crate::denomination::{DenominationDirectory, DenominationStatus};
use crate::error::WithdrawError;
use crate::store::{reconstruct_balance, Store, WithdrawOutcome, WithdrawRequest as StoreWithdrawRequest};

/// Maximum number of times a single withdraw is retried after a
/// [`crate::store::StoreError::SoftError`] before giving up.
const MAX_SERIALIZATION_RETRIES: u32 = 8;

/// The wallet-supplied fields of a withdraw request, after request-body
/// parsing but before any validation.
#[derive(Debug, Clone)]
pub struct WithdrawInput {
    pub reserve_pub: [u8; 32],
    pub reserve_sig: [u8; 64],
    pub denom_pub_hash: [u8; 64],
    pub blinded_coin: Vec<u8>,
}

/// A successfully-applied (or idempotently replayed) withdraw.
#[derive(Debug, Clone)]
pub struct WithdrawSuccess {
    pub blind_signature: Vec<u8>,
}

pub async fn handle_withdraw(
    store: &dyn Store,
    denominations: &dyn DenominationDirectory,
    input: WithdrawInput,
    now: DateTime<Utc>,
) -> Result<WithdrawSuccess, WithdrawError> {
    let denomination = denominations
        .lookup(&input.denom_pub_hash)
        .ok_or(WithdrawError::UnknownDenomination)?;

    match denomination.status_at(now) {
        DenominationStatus::Valid => {}
        DenominationStatus::Expired => return Err(WithdrawError::DenominationExpired),
        DenominationStatus::NotYetValid => return Err(WithdrawError::DenominationNotYetValid),
        DenominationStatus::Revoked => return Err(WithdrawError::DenominationRevoked),
    }

    let (amount_with_fee, _) = Amount::add(denomination.value, denomination.fee_withdraw)?;
    let h_coin_envelope = hash_coin_envelope(&input.blinded_coin);

    let purpose = WithdrawRequestPurpose {
        reserve_pub: &input.reserve_pub,
        h_denom_pub: &denomination.denom_pub_hash,
        h_coin_envelope: &h_coin_envelope,
        amount_with_fee,
    };
    verify_withdraw_request(&input.reserve_pub, &input.reserve_sig, &purpose)?;

    // Optimistic sign: done once, outside and before the retry loop.
    let blind_signature = denomination
        .signer
        .sign_blinded(&input.blinded_coin)
        .map_err(|e| WithdrawError::Storage(crate::store::StoreError::HardError(e.to_string())))?;

    let request = StoreWithdrawRequest {
        reserve_pub: input.reserve_pub,
        reserve_sig: input.reserve_sig,
        denom_pub_hash: input.denom_pub_hash,
        amount_with_fee,
        h_coin_envelope,
        blinded_coin: input.blinded_coin,
    };

    apply_with_retries(store, &request, &blind_signature, &denomination).await
}

async fn apply_with_retries(
    store: &dyn Store,
    request: &StoreWithdrawRequest,
    blind_signature: &[u8],
    denomination: &Arc<crate::denomination::Denomination>,
) -> Result<WithdrawSuccess, WithdrawError> {
    let mut attempt = 0;
    loop {
        match store.do_withdraw(request, blind_signature).await {
            Ok(WithdrawOutcome::Applied { blind_signature }) => {
                info!(
                    reserve_pub = %base32::encode(&request.reserve_pub),
                    denom_pub_hash = %base32::encode(&denomination.denom_pub_hash),
                    "withdraw applied"
                );
                return Ok(WithdrawSuccess { blind_signature });
            }
            Ok(WithdrawOutcome::AlreadyApplied { blind_signature }) => {
                info!(
                    reserve_pub = %base32::encode(&request.reserve_pub),
                    "withdraw replayed idempotently"
                );
                return Ok(WithdrawSuccess { blind_signature });
            }
            Ok(WithdrawOutcome::ReserveUnknown) => {
                return Err(WithdrawError::ReserveUnknown(base32::encode(
                    &request.reserve_pub,
                )))
            }
            Ok(WithdrawOutcome::InsufficientFunds { balance, history }) => {
                let reconstructed = reconstruct_balance(balance.currency(), &history).map_err(|e| {
                    WithdrawError::InvariantFailure(format!(
                        "failed to reconstruct reserve balance from history: {e}"
                    ))
                })?;
                if reconstructed.compare(&balance) != std::cmp::Ordering::Equal {
                    return Err(WithdrawError::InvariantFailure(format!(
                        "reserve balance corrupt: stored balance {balance} does not match \
                         history-derived balance {reconstructed}"
                    )));
                }
                return Err(WithdrawError::InsufficientFunds { balance, history });
            }
            Err(e) if e.is_retryable() && attempt < MAX_SERIALIZATION_RETRIES => {
                attempt += 1;
                warn!(attempt, "withdraw transaction conflicted, retrying");
                continue;
            }
            Err(e) => return Err(WithdrawError::Storage(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blind_sign::RsaBlindSigner;
    use crate::denomination::Denomination;
    use crate::store::{ClosingRecord, ReserveHistoryEntry, StoreError, WireFee, WirePrepareRecord};
    use async_trait::async_trait;
    use chrono::Duration;
    use ed25519_dalek::{Signer, SigningKey};
    use rsa::{rand_core::OsRng, RsaPrivateKey};
    use std::sync::Mutex;

    struct FakeStore {
        applied: Mutex<Option<Vec<u8>>>,
    }

    #[async_trait]
    impl Store for FakeStore {
        async fn get_reserve(
            &self,
            _reserve_pub: &[u8; 32],
        ) -> Result<Option<crate::store::Reserve>, StoreError> {
            Ok(None)
        }

        async fn get_reserve_history(
            &self,
            _reserve_pub: &[u8; 32],
        ) -> Result<Vec<ReserveHistoryEntry>, StoreError> {
            Ok(vec![])
        }

        async fn do_withdraw(
            &self,
            _request: &StoreWithdrawRequest,
            blind_signature: &[u8],
        ) -> Result<WithdrawOutcome, StoreError> {
            let mut applied = self.applied.lock().unwrap();
            if let Some(existing) = applied.clone() {
                return Ok(WithdrawOutcome::AlreadyApplied {
                    blind_signature: existing,
                });
            }
            *applied = Some(blind_signature.to_vec());
            Ok(WithdrawOutcome::Applied {
                blind_signature: blind_signature.to_vec(),
            })
        }

        async fn expired_reserves(
            &self,
            _now: DateTime<Utc>,
            _limit: i64,
        ) -> Result<Vec<crate::store::Reserve>, StoreError> {
            Ok(vec![])
        }

        async fn commit_closure(
            &self,
            _closing: &ClosingRecord,
            _wire_prepare: Option<&WirePrepareRecord>,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn get_wire_fee(&self, _method: &str, _at: DateTime<Utc>) -> Result<WireFee, StoreError> {
            unimplemented!()
        }
    }

    fn sample_denomination() -> (Denomination, SigningKey) {
        let private_key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let signer = Arc::new(RsaBlindSigner::new(private_key).unwrap());
        let now = Utc::now();
        let reserve_key = SigningKey::from_bytes(&[3u8; 32]);
        (
            Denomination {
                denom_pub_hash: [7u8; 64],
                value: Amount::from_parts("EUR", 1, 0).unwrap(),
                fee_withdraw: Amount::zero("EUR").unwrap(),
                valid_from: now - Duration::hours(1),
                expire_withdraw: now + Duration::hours(1),
                expire_deposit: now + Duration::days(30),
                expire_legal: now + Duration::days(3650),
                recoup_possible: false,
                signer,
            },
            reserve_key,
        )
    }

    fn sign_withdraw(
        reserve_key: &SigningKey,
        denom_pub_hash: &[u8; 64],
        blinded_coin: &[u8],
        amount_with_fee: Amount,
    ) -> (WithdrawInput, [u8; 32]) {
        let h_coin_envelope = hash_coin_envelope(blinded_coin);
        let reserve_pub = reserve_key.verifying_key().to_bytes();
        let purpose = WithdrawRequestPurpose {
            reserve_pub: &reserve_pub,
            h_denom_pub: denom_pub_hash,
            h_coin_envelope: &h_coin_envelope,
            amount_with_fee,
        };
        let sig = reserve_key.sign(&purpose.to_signed_bytes());
        (
            WithdrawInput {
                reserve_pub: reserve_key.verifying_key().to_bytes(),
                reserve_sig: sig.to_bytes(),
                denom_pub_hash: *denom_pub_hash,
                blinded_coin: blinded_coin.to_vec(),
            },
            reserve_key.verifying_key().to_bytes(),
        )
    }

    #[tokio::test]
    async fn applies_and_then_replays_idempotently() {
        let (denom, reserve_key) = sample_denomination();
        let dir = crate::denomination::InMemoryDenominationDirectory::new(vec![denom]);
        let store = FakeStore {
            applied: Mutex::new(None),
        };

        let blinded_coin = vec![0x11u8; 32];
        let (input, _) = sign_withdraw(
            &reserve_key,
            &[7u8; 64],
            &blinded_coin,
            Amount::from_parts("EUR", 1, 0).unwrap(),
        );

        let first = handle_withdraw(&store, &dir, input.clone(), Utc::now())
            .await
            .unwrap();
        let second = handle_withdraw(&store, &dir, input, Utc::now()).await.unwrap();
        assert_eq!(first.blind_signature, second.blind_signature);
    }

    #[tokio::test]
    async fn rejects_unknown_denomination() {
        let (_, reserve_key) = sample_denomination();
        let dir = crate::denomination::InMemoryDenominationDirectory::new(vec![]);
        let store = FakeStore {
            applied: Mutex::new(None),
        };
        let blinded_coin = vec![0x11u8; 32];
        let (input, _) = sign_withdraw(
            &reserve_key,
            &[7u8; 64],
            &blinded_coin,
            Amount::from_parts("EUR", 1, 0).unwrap(),
        );
        let err = handle_withdraw(&store, &dir, input, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, WithdrawError::UnknownDenomination));
    }

    #[tokio::test]
    async fn rejects_bad_signature() {
        let (denom, reserve_key) = sample_denomination();
        let dir = crate::denomination::InMemoryDenominationDirectory::new(vec![denom]);
        let store = FakeStore {
            applied: Mutex::new(None),
        };
        let blinded_coin = vec![0x11u8; 32];
        let (mut input, _) = sign_withdraw(
            &reserve_key,
            &[7u8; 64],
            &blinded_coin,
            Amount::from_parts("EUR", 1, 0).unwrap(),
        );
        input.reserve_sig[0] ^= 0xff;
        let err = handle_withdraw(&store, &dir, input, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, WithdrawError::InvalidSignature(_)));
    }

    #[tokio::test]
    async fn rejects_not_yet_valid_denomination_as_precondition_failed() {
        let (mut denom, reserve_key) = sample_denomination();
        denom.valid_from = Utc::now() + Duration::hours(1);
        denom.expire_withdraw = Utc::now() + Duration::hours(2);
        let dir = crate::denomination::InMemoryDenominationDirectory::new(vec![denom]);
        let store = FakeStore {
            applied: Mutex::new(None),
        };
        let blinded_coin = vec![0x11u8; 32];
        let (input, _) = sign_withdraw(
            &reserve_key,
            &[7u8; 64],
            &blinded_coin,
            Amount::from_parts("EUR", 1, 0).unwrap(),
        );
        let err = handle_withdraw(&store, &dir, input, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, WithdrawError::DenominationNotYetValid));
        assert_eq!(err.http_status(), 412);
    }

    #[tokio::test]
    async fn rejects_revoked_denomination_distinctly_from_expired() {
        let (mut denom, reserve_key) = sample_denomination();
        denom.recoup_possible = true;
        let dir = crate::denomination::InMemoryDenominationDirectory::new(vec![denom]);
        let store = FakeStore {
            applied: Mutex::new(None),
        };
        let blinded_coin = vec![0x11u8; 32];
        let (input, _) = sign_withdraw(
            &reserve_key,
            &[7u8; 64],
            &blinded_coin,
            Amount::from_parts("EUR", 1, 0).unwrap(),
        );
        let err = handle_withdraw(&store, &dir, input, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, WithdrawError::DenominationRevoked));
        assert_eq!(err.http_status(), 410);
        assert_eq!(err.code(), "DENOMINATION_REVOKED");
    }

    struct InsufficientFundsStore {
        balance: Amount,
        history: Vec<ReserveHistoryEntry>,
    }

    #[async_trait]
    impl Store for InsufficientFundsStore {
        async fn get_reserve(&self, _: &[u8; 32]) -> Result<Option<crate::store::Reserve>, StoreError> {
            Ok(None)
        }

        async fn get_reserve_history(&self, _: &[u8; 32]) -> Result<Vec<ReserveHistoryEntry>, StoreError> {
            Ok(vec![])
        }

        async fn do_withdraw(
            &self,
            _request: &StoreWithdrawRequest,
            _blind_signature: &[u8],
        ) -> Result<WithdrawOutcome, StoreError> {
            Ok(WithdrawOutcome::InsufficientFunds {
                balance: self.balance,
                history: self.history.clone(),
            })
        }

        async fn expired_reserves(
            &self,
            _now: DateTime<Utc>,
            _limit: i64,
        ) -> Result<Vec<crate::store::Reserve>, StoreError> {
            Ok(vec![])
        }

        async fn commit_closure(
            &self,
            _closing: &ClosingRecord,
            _wire_prepare: Option<&WirePrepareRecord>,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn get_wire_fee(&self, _method: &str, _at: DateTime<Utc>) -> Result<WireFee, StoreError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn insufficient_funds_reports_balance_alongside_history() {
        let (denom, reserve_key) = sample_denomination();
        let dir = crate::denomination::InMemoryDenominationDirectory::new(vec![denom]);
        let balance = Amount::from_parts("EUR", 0, 0).unwrap();
        let store = InsufficientFundsStore {
            balance,
            history: vec![],
        };
        let blinded_coin = vec![0x11u8; 32];
        let (input, _) = sign_withdraw(
            &reserve_key,
            &[7u8; 64],
            &blinded_coin,
            Amount::from_parts("EUR", 1, 0).unwrap(),
        );
        let err = handle_withdraw(&store, &dir, input, Utc::now())
            .await
            .unwrap_err();
        match err {
            WithdrawError::InsufficientFunds { balance: reported, history } => {
                assert_eq!(reported.compare(&balance), std::cmp::Ordering::Equal);
                assert!(history.is_empty());
            }
            other => panic!("expected InsufficientFunds, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn insufficient_funds_with_corrupt_history_fails_closed() {
        let (denom, reserve_key) = sample_denomination();
        let dir = crate::denomination::InMemoryDenominationDirectory::new(vec![denom]);
        // Store claims a balance of EUR:5, but the history it hands back
        // reconstructs to EUR:0 — the two must agree or the handler must
        // refuse to trust either.
        let store = InsufficientFundsStore {
            balance: Amount::from_parts("EUR", 5, 0).unwrap(),
            history: vec![],
        };
        let blinded_coin = vec![0x11u8; 32];
        let (input, _) = sign_withdraw(
            &reserve_key,
            &[7u8; 64],
            &blinded_coin,
            Amount::from_parts("EUR", 1, 0).unwrap(),
        );
        let err = handle_withdraw(&store, &dir, input, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, WithdrawError::InvariantFailure(_)));
        assert_eq!(err.http_status(), 500);
    }
}
