//! One pass of the reserve-closer: find reserves past their expiration,
//! sweep their remaining balance into a staged wire transfer, and record
//! the closure. The scheduling loop (sleep/shutdown/re-arm) lives in the
//! `exchange-closer` binary; this module is the transactional unit it
//! calls on every tick, kept here so it can be exercised without a
//! runtime loop around it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::amount::{Amount, AmountArithmeticError};
use crate::store::{ClosingRecord, Reserve, Store, StoreError, WirePrepareRecord};

// The wtid is derived as a SHA-256 digest, which is exactly as wide as
// an Ed25519 reserve public key. If that ever changes, the byte layout
// `exchange-db` persists both as needs revisiting together.
const _WTID_MATCHES_RESERVE_PUB_LEN: () = assert!(32 == std::mem::size_of::<[u8; 32]>());

#[derive(Debug, Error)]
pub enum CloserError {
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("amount arithmetic failed while closing a reserve: {0}")]
    Arithmetic(#[from] AmountArithmeticError),
    #[error("no wire account is configured for payto URI {0}")]
    WireAccountNotConfigured(String),
    #[error("no wire fee schedule covers this reserve's wire method: {0}")]
    WireFeeMissing(String),
}

impl CloserError {
    /// Whether the caller should retry the current pass immediately
    /// rather than treat this as fatal. Only a transient storage
    /// conflict qualifies; a missing wire account or fee schedule is a
    /// configuration problem that will not resolve itself by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CloserError::Storage(e) if e.is_retryable())
    }
}

/// Resolves the payto URI a reserve was funded from to the wire method
/// the exchange's fee schedule is keyed on (e.g. `"iban"`, `"x-taler-bank"`).
pub trait WireAccountDirectory: Send + Sync {
    fn resolve_method(&self, payto_uri: &str) -> Option<String>;
}

/// A fixed in-memory mapping from payto URI to wire method, loaded once
/// at startup from the exchange's configured wire accounts.
#[derive(Default)]
pub struct InMemoryWireAccountDirectory {
    by_payto_uri: HashMap<String, String>,
}

impl InMemoryWireAccountDirectory {
    pub fn new(accounts: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            by_payto_uri: accounts.into_iter().collect(),
        }
    }
}

impl WireAccountDirectory for InMemoryWireAccountDirectory {
    fn resolve_method(&self, payto_uri: &str) -> Option<String> {
        self.by_payto_uri.get(payto_uri).cloned()
    }
}

/// Rounding configuration the closer applies to every reserve it sweeps.
/// Loaded once at startup; constant for the process lifetime. The
/// closing fee itself is not here: it is published in the exchange's fee
/// schedule and looked up per reserve via [`Store::get_wire_fee`], since
/// it can change over time and differs by wire method.
#[derive(Clone)]
pub struct CloserConfig {
    pub wire_accounts: Arc<dyn WireAccountDirectory>,
    /// The wire medium's minimum transferable unit; the swept amount is
    /// rounded down to a multiple of this before transfer.
    pub wire_granularity: Amount,
    pub exchange_base_url: String,
    /// Number of expired reserves fetched per database round trip.
    pub batch_size: i64,
}

#[derive(Debug, Default)]
pub struct ClosingStats {
    pub reserves_closed: u64,
    pub reserves_skipped_zero_balance: u64,
}

fn derive_wtid(reserve_pub: &[u8; 32], timestamp: DateTime<Utc>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(reserve_pub);
    hasher.update(timestamp.timestamp_nanos_opt().unwrap_or(0).to_be_bytes());
    hasher.finalize().into()
}

/// Close one expired reserve: subtract the closing fee, round down to
/// wire granularity, and return the closure record plus the wire
/// transfer to stage, if any. A [`ClosingRecord`] is always produced —
/// `ClosingRecord.amount` is always the reserve's pre-fee balance, per
/// the exchange's ledger semantics. The [`WirePrepareRecord`] is `None`
/// when the closing fee consumes the whole balance (or rounding leaves
/// nothing transferable); in that case `closing_fee` is widened to cover
/// the entire balance rather than the schedule's nominal fee, so the
/// ledger still balances to zero.
fn prepare_closure(
    reserve: &Reserve,
    closing_fee: Amount,
    wire_granularity: &Amount,
    exchange_base_url: &str,
    now: DateTime<Utc>,
) -> Result<(ClosingRecord, Option<WirePrepareRecord>), CloserError> {
    let wtid = derive_wtid(&reserve.reserve_pub, now);

    let (rounded, actual_closing_fee) = match Amount::subtract(reserve.balance, closing_fee) {
        Ok((after_fee, false)) => {
            let (rounded, _) = Amount::round_down(after_fee, wire_granularity)?;
            (rounded, closing_fee)
        }
        Ok((_, true)) | Err(AmountArithmeticError::NegativeResult) => {
            let zero = Amount::from_parts(reserve.balance.currency(), 0, 0)
                .expect("reserve currency is already valid");
            (zero, reserve.balance)
        }
        Err(e) => return Err(e.into()),
    };

    let closing = ClosingRecord {
        reserve_pub: reserve.reserve_pub,
        amount: reserve.balance,
        closing_fee: actual_closing_fee,
        wtid,
        timestamp: now,
    };

    let wire_prepare = if rounded.value == 0 && rounded.fraction == 0 {
        None
    } else {
        Some(WirePrepareRecord {
            wtid,
            payto_uri: reserve.sender_account.clone(),
            amount: rounded,
            exchange_base_url: exchange_base_url.to_string(),
        })
    };

    Ok((closing, wire_prepare))
}

/// Run one closer pass: fetch up to `config.batch_size` expired
/// reserves and close each of them. Returns once the batch is empty,
/// regardless of whether more expired reserves remain (the caller loops
/// again immediately in that case, per `SPEC_FULL.md`'s three-way re-arm).
pub async fn run_once(
    store: &dyn Store,
    config: &CloserConfig,
    now: DateTime<Utc>,
) -> Result<ClosingStats, CloserError> {
    let expired = store.expired_reserves(now, config.batch_size).await?;
    let mut stats = ClosingStats::default();

    for reserve in &expired {
        let method = config
            .wire_accounts
            .resolve_method(&reserve.sender_account)
            .ok_or_else(|| CloserError::WireAccountNotConfigured(reserve.sender_account.clone()))?;
        let wire_fee = store
            .get_wire_fee(&method, reserve.expiration_date)
            .await
            .map_err(|e| CloserError::WireFeeMissing(format!("{method}: {e}")))?;

        let (closing, wire_prepare) = prepare_closure(
            reserve,
            wire_fee.closing_fee,
            &config.wire_granularity,
            &config.exchange_base_url,
            now,
        )?;
        store.commit_closure(&closing, wire_prepare.as_ref()).await?;

        if wire_prepare.is_some() {
            stats.reserves_closed += 1;
            info!(
                reserve_pub = %crate::base32::encode(&reserve.reserve_pub),
                amount = %closing.amount,
                "closed expired reserve"
            );
        } else {
            stats.reserves_skipped_zero_balance += 1;
            warn!(
                reserve_pub = %crate::base32::encode(&reserve.reserve_pub),
                "expired reserve balance did not exceed closing fee plus rounding, closed with no transfer"
            );
        }
    }

    Ok(stats)
}

/// Whether the caller should poll again immediately rather than sleep:
/// true iff the last batch was full, meaning more expired reserves may
/// still be waiting.
pub fn batch_was_full(stats: &ClosingStats, config: &CloserConfig) -> bool {
    (stats.reserves_closed + stats.reserves_skipped_zero_balance) as i64 == config.batch_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ReserveHistoryEntry, WireFee, WithdrawOutcome, WithdrawRequest};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeStore {
        expired: Mutex<Vec<Reserve>>,
        closed: Mutex<Vec<(ClosingRecord, bool)>>,
        closing_fee: Amount,
        wire_fee_missing: bool,
    }

    #[async_trait]
    impl Store for FakeStore {
        async fn get_reserve(&self, _: &[u8; 32]) -> Result<Option<Reserve>, StoreError> {
            Ok(None)
        }
        async fn get_reserve_history(
            &self,
            _: &[u8; 32],
        ) -> Result<Vec<ReserveHistoryEntry>, StoreError> {
            Ok(vec![])
        }
        async fn do_withdraw(
            &self,
            _: &WithdrawRequest,
            _: &[u8],
        ) -> Result<WithdrawOutcome, StoreError> {
            unimplemented!()
        }
        async fn expired_reserves(
            &self,
            _now: DateTime<Utc>,
            _limit: i64,
        ) -> Result<Vec<Reserve>, StoreError> {
            Ok(self.expired.lock().unwrap().clone())
        }
        async fn commit_closure(
            &self,
            closing: &ClosingRecord,
            wire_prepare: Option<&WirePrepareRecord>,
        ) -> Result<(), StoreError> {
            self.closed
                .lock()
                .unwrap()
                .push((closing.clone(), wire_prepare.is_some()));
            Ok(())
        }
        async fn get_wire_fee(&self, _method: &str, _at: DateTime<Utc>) -> Result<WireFee, StoreError> {
            if self.wire_fee_missing {
                return Err(StoreError::HardError("no wire fee schedule".to_string()));
            }
            let now = Utc::now();
            Ok(WireFee {
                wire_fee: Amount::zero("EUR").unwrap(),
                closing_fee: self.closing_fee,
                start_date: now - chrono::Duration::days(1),
                end_date: now + chrono::Duration::days(1),
            })
        }
    }

    fn fake_store(expired: Vec<Reserve>) -> FakeStore {
        FakeStore {
            expired: Mutex::new(expired),
            closed: Mutex::new(vec![]),
            closing_fee: Amount::from_parts("EUR", 0, 1_000_000).unwrap(), // 0.01
            wire_fee_missing: false,
        }
    }

    fn config() -> CloserConfig {
        CloserConfig {
            wire_accounts: Arc::new(InMemoryWireAccountDirectory::new([
                ("payto://iban/DE1".to_string(), "iban".to_string()),
                ("payto://iban/DE2".to_string(), "iban".to_string()),
                ("payto://iban/DE3".to_string(), "iban".to_string()),
            ])),
            wire_granularity: Amount::from_parts("EUR", 0, 1_000_000).unwrap(),
            exchange_base_url: "https://exchange.example/".to_string(),
            batch_size: 100,
        }
    }

    #[tokio::test]
    async fn closes_a_reserve_with_balance_above_fee() {
        let reserve = Reserve {
            reserve_pub: [1u8; 32],
            balance: Amount::from_parts("EUR", 5, 0).unwrap(),
            expiration_date: Utc::now(),
            sender_account: "payto://iban/DE1".to_string(),
        };
        let store = fake_store(vec![reserve]);
        let stats = run_once(&store, &config(), Utc::now()).await.unwrap();
        assert_eq!(stats.reserves_closed, 1);
        let closed = store.closed.lock().unwrap();
        assert_eq!(closed.len(), 1);
        let (closing, had_transfer) = &closed[0];
        assert!(had_transfer);
        // ClosingRecord.amount is the pre-fee balance, not the rounded
        // post-fee transfer amount.
        assert_eq!(closing.amount.to_string(), "EUR:5");
        assert_eq!(closing.closing_fee.to_string(), "EUR:0.01");
    }

    #[tokio::test]
    async fn closes_reserve_whose_fee_consumes_the_whole_balance_with_no_transfer() {
        let reserve = Reserve {
            reserve_pub: [2u8; 32],
            balance: Amount::from_parts("EUR", 0, 500_000).unwrap(), // 0.005 < 0.01 fee
            expiration_date: Utc::now(),
            sender_account: "payto://iban/DE2".to_string(),
        };
        let store = fake_store(vec![reserve]);
        let stats = run_once(&store, &config(), Utc::now()).await.unwrap();
        assert_eq!(stats.reserves_closed, 0);
        assert_eq!(stats.reserves_skipped_zero_balance, 1);
        // The closure is still recorded unconditionally, even with no
        // wire transfer, so the reserve is never reprocessed.
        let closed = store.closed.lock().unwrap();
        assert_eq!(closed.len(), 1);
        let (closing, had_transfer) = &closed[0];
        assert!(!had_transfer);
        assert_eq!(closing.amount.to_string(), "EUR:0.005");
        assert_eq!(closing.closing_fee.to_string(), "EUR:0.005");
    }

    #[tokio::test]
    async fn fails_the_pass_when_no_wire_account_is_configured() {
        let reserve = Reserve {
            reserve_pub: [3u8; 32],
            balance: Amount::from_parts("EUR", 5, 0).unwrap(),
            expiration_date: Utc::now(),
            sender_account: "payto://iban/UNKNOWN".to_string(),
        };
        let store = fake_store(vec![reserve]);
        let err = run_once(&store, &config(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, CloserError::WireAccountNotConfigured(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn fails_the_pass_when_no_wire_fee_schedule_covers_the_method() {
        let reserve = Reserve {
            reserve_pub: [4u8; 32],
            balance: Amount::from_parts("EUR", 5, 0).unwrap(),
            expiration_date: Utc::now(),
            sender_account: "payto://iban/DE3".to_string(),
        };
        let mut store = fake_store(vec![reserve]);
        store.wire_fee_missing = true;
        let err = run_once(&store, &config(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, CloserError::WireFeeMissing(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn batch_full_signals_immediate_rerun() {
        let cfg = config();
        let stats = ClosingStats {
            reserves_closed: 100,
            reserves_skipped_zero_balance: 0,
        };
        assert!(batch_was_full(&stats, &cfg));
        let stats = ClosingStats {
            reserves_closed: 3,
            reserves_skipped_zero_balance: 0,
        };
        assert!(!batch_was_full(&stats, &cfg));
    }
}
