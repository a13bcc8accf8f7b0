//! Storage contract for reserves, withdrawals, and reserve closures.
//!
//! This crate never talks to a database directly — `exchange-db`
//! implements [`Store`] against Postgres. Keeping the trait here lets
//! the withdraw handler and the closer loop stay storage-agnostic and
//! testable against an in-memory fake.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::amount::{Amount, AmountArithmeticError};

/// Every storage failure is either retryable (a serialization conflict
/// under `SERIALIZABLE` isolation, or a detected deadlock) or fatal.
/// Callers retry a `SoftError` by re-running the whole transaction from
/// scratch; a `HardError` propagates as a 500.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transient storage conflict, retry: {0}")]
    SoftError(String),
    #[error("storage error: {0}")]
    HardError(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::SoftError(_))
    }
}

/// A funded reserve: an Ed25519 public key identifying the account, its
/// current balance, and the time after which it becomes eligible for
/// the closer to sweep.
#[derive(Debug, Clone)]
pub struct Reserve {
    pub reserve_pub: [u8; 32],
    pub balance: Amount,
    pub expiration_date: DateTime<Utc>,
    /// The payto URI funds were wired in from, and where the closer
    /// sends any balance left when the reserve expires unused.
    pub sender_account: String,
}

/// One entry in a reserve's audit trail, as returned to wallets so they
/// can reconcile their view of a reserve against the exchange's.
#[derive(Debug, Clone)]
pub enum ReserveHistoryEntry {
    /// A wire transfer credited this reserve.
    Credit {
        amount: Amount,
        wire_reference: String,
        timestamp: DateTime<Utc>,
    },
    /// A coin was withdrawn, debiting the reserve by `amount_with_fee`.
    Withdraw {
        amount_with_fee: Amount,
        denom_pub_hash: [u8; 64],
        h_coin_envelope: [u8; 64],
        timestamp: DateTime<Utc>,
    },
    /// The reserve was closed out by the closer loop.
    Closing {
        amount: Amount,
        closing_fee: Amount,
        wtid: [u8; 32],
        timestamp: DateTime<Utc>,
    },
}

/// The withdraw request as validated by the handler: signature
/// verification and denomination lookup have already happened by the
/// time this reaches the store, which only needs to apply it
/// atomically against the reserve's current balance.
#[derive(Debug, Clone)]
pub struct WithdrawRequest {
    pub reserve_pub: [u8; 32],
    pub reserve_sig: [u8; 64],
    pub denom_pub_hash: [u8; 64],
    pub amount_with_fee: Amount,
    pub h_coin_envelope: [u8; 64],
    pub blinded_coin: Vec<u8>,
}

/// Outcome of attempting to apply a withdraw request.
#[derive(Debug, Clone)]
pub enum WithdrawOutcome {
    /// The withdraw was applied for the first time; `blind_signature` is
    /// what the handler computed and the store persisted alongside it.
    Applied { blind_signature: Vec<u8> },
    /// `h_coin_envelope` was already recorded with this exact request;
    /// the original blind signature is returned unchanged so a retried
    /// request is idempotent rather than double-spending the reserve.
    AlreadyApplied { blind_signature: Vec<u8> },
    /// No reserve exists with this public key.
    ReserveUnknown,
    /// The reserve exists but its balance cannot cover `amount_with_fee`;
    /// the full history is attached so the caller can render a 409 with
    /// the evidence the wallet needs to reconcile, along with the
    /// reserve's authoritative balance for the cross-check against that
    /// history.
    InsufficientFunds {
        balance: Amount,
        history: Vec<ReserveHistoryEntry>,
    },
}

/// Recomputes a reserve's balance purely from its audit history: sum of
/// credits, minus withdrawals, minus closings. Used to cross-check the
/// balance the store reports whenever a withdraw is denied for
/// insufficient funds — a mismatch means the ledger itself is corrupt,
/// not that the wallet asked for too much.
pub fn reconstruct_balance(
    currency: &str,
    history: &[ReserveHistoryEntry],
) -> Result<Amount, AmountArithmeticError> {
    let mut balance =
        Amount::from_parts(currency, 0, 0).map_err(|_| AmountArithmeticError::IncompatibleCurrencies)?;
    for entry in history {
        balance = match entry {
            ReserveHistoryEntry::Credit { amount, .. } => Amount::add(balance, *amount)?.0,
            ReserveHistoryEntry::Withdraw { amount_with_fee, .. } => {
                Amount::subtract(balance, *amount_with_fee)?.0
            }
            ReserveHistoryEntry::Closing { amount, .. } => Amount::subtract(balance, *amount)?.0,
        };
    }
    Ok(balance)
}

/// A reserve closure, ready to be committed alongside a staged wire
/// transfer in the same transaction.
#[derive(Debug, Clone)]
pub struct ClosingRecord {
    pub reserve_pub: [u8; 32],
    pub amount: Amount,
    pub closing_fee: Amount,
    pub wtid: [u8; 32],
    pub timestamp: DateTime<Utc>,
}

/// A staged outgoing wire transfer, produced by closing a reserve.
#[derive(Debug, Clone)]
pub struct WirePrepareRecord {
    pub wtid: [u8; 32],
    pub payto_uri: String,
    pub amount: Amount,
    pub exchange_base_url: String,
}

/// The wire and closing fee that applied to a given wire method at a
/// given time, as published by the exchange's fee schedule.
#[derive(Debug, Clone, Copy)]
pub struct WireFee {
    pub wire_fee: Amount,
    pub closing_fee: Amount,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Look up a reserve by its public key.
    async fn get_reserve(&self, reserve_pub: &[u8; 32]) -> Result<Option<Reserve>, StoreError>;

    /// Full audit history for a reserve, oldest first.
    async fn get_reserve_history(
        &self,
        reserve_pub: &[u8; 32],
    ) -> Result<Vec<ReserveHistoryEntry>, StoreError>;

    /// Atomically apply a withdraw request: check for a prior identical
    /// request by `h_coin_envelope` (idempotency), check the reserve's
    /// balance, debit it, and persist `blind_signature` alongside the
    /// request row. Implementations run this under a serializable
    /// transaction and surface conflicts as [`StoreError::SoftError`].
    async fn do_withdraw(
        &self,
        request: &WithdrawRequest,
        blind_signature: &[u8],
    ) -> Result<WithdrawOutcome, StoreError>;

    /// Reserves whose `expiration_date` has passed and which have not
    /// yet been closed, oldest-expiring first, at most `limit` rows.
    async fn expired_reserves(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Reserve>, StoreError>;

    /// Atomically record a reserve closure and, if there is anything left
    /// to transfer after fees and rounding, stage its wire transfer in
    /// the same transaction. `wire_prepare` is `None` when the closing
    /// fee consumed the entire balance; the closure itself is still
    /// recorded unconditionally.
    async fn commit_closure(
        &self,
        closing: &ClosingRecord,
        wire_prepare: Option<&WirePrepareRecord>,
    ) -> Result<(), StoreError>;

    /// The wire and closing fee that applies to `method` at `at`, as
    /// published by the exchange's fee schedule. Fails (as a hard error)
    /// if no fee schedule covers this method at this time.
    async fn get_wire_fee(&self, method: &str, at: DateTime<Utc>) -> Result<WireFee, StoreError>;
}
