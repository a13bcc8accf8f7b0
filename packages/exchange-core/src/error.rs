//! Error taxonomy for requests that cross the HTTP boundary.
//!
//! This crate has no HTTP dependency; the numeric status here is the one
//! `exchange-httpd` puts on the wire, kept alongside the error so every
//! caller (the axum layer, tests, future transports) agrees on the
//! mapping without re-deriving it.

use thiserror::Error;

use crate::amount::{Amount, AmountArithmeticError, AmountParseError};
use crate::crypto::CryptoError;
use crate::store::{ReserveHistoryEntry, StoreError};

/// Errors the withdraw handler can report, each tagged with the HTTP
/// status and a short machine-readable code a wallet can switch on.
#[derive(Debug, Error)]
pub enum WithdrawError {
    #[error("denomination key is unknown to this exchange")]
    UnknownDenomination,

    #[error("denomination key is no longer valid for withdrawal")]
    DenominationExpired,

    #[error("denomination key is not yet valid for withdrawal")]
    DenominationNotYetValid,

    #[error("denomination key has been revoked")]
    DenominationRevoked,

    #[error("reserve signature does not verify")]
    InvalidSignature(#[from] CryptoError),

    #[error("reserve {0} is unknown")]
    ReserveUnknown(String),

    #[error("reserve balance is insufficient to cover the withdrawal")]
    InsufficientFunds {
        balance: Amount,
        history: Vec<ReserveHistoryEntry>,
    },

    #[error("amount is malformed: {0}")]
    MalformedAmount(#[from] AmountParseError),

    #[error("amount arithmetic failed: {0}")]
    Arithmetic(#[from] AmountArithmeticError),

    #[error(transparent)]
    Storage(#[from] StoreError),

    /// The reserve's stored balance does not match the balance
    /// reconstructed by replaying its own history. The ledger itself is
    /// corrupt; there is no safe response but to fail closed.
    #[error("reserve balance corrupt: {0}")]
    InvariantFailure(String),
}

impl WithdrawError {
    /// HTTP status this error maps to.
    pub fn http_status(&self) -> u16 {
        match self {
            WithdrawError::UnknownDenomination => 404,
            WithdrawError::DenominationExpired => 410,
            WithdrawError::DenominationNotYetValid => 412,
            WithdrawError::DenominationRevoked => 410,
            WithdrawError::InvalidSignature(_) => 403,
            WithdrawError::ReserveUnknown(_) => 404,
            WithdrawError::InsufficientFunds { .. } => 409,
            WithdrawError::MalformedAmount(_) | WithdrawError::Arithmetic(_) => 400,
            WithdrawError::Storage(e) if e.is_retryable() => 503,
            WithdrawError::Storage(_) => 500,
            WithdrawError::InvariantFailure(_) => 500,
        }
    }

    /// Short machine-readable code, stable across releases, that a
    /// wallet implementation can match on without parsing prose.
    pub fn code(&self) -> &'static str {
        match self {
            WithdrawError::UnknownDenomination => "DENOMINATION_UNKNOWN",
            WithdrawError::DenominationExpired => "DENOMINATION_EXPIRED",
            WithdrawError::DenominationNotYetValid => "DENOMINATION_NOT_YET_VALID",
            WithdrawError::DenominationRevoked => "DENOMINATION_REVOKED",
            WithdrawError::InvalidSignature(_) => "RESERVE_SIGNATURE_INVALID",
            WithdrawError::ReserveUnknown(_) => "RESERVE_UNKNOWN",
            WithdrawError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            WithdrawError::MalformedAmount(_) => "AMOUNT_MALFORMED",
            WithdrawError::Arithmetic(_) => "AMOUNT_ARITHMETIC_FAILURE",
            WithdrawError::Storage(e) if e.is_retryable() => "STORAGE_CONFLICT_RETRY",
            WithdrawError::Storage(_) => "STORAGE_FAILURE",
            WithdrawError::InvariantFailure(_) => "INVARIANT_FAILURE",
        }
    }
}
