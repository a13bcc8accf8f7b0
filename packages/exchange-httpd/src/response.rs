//! Wire JSON shapes for the two endpoints, and the shared error envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use exchange_core::amount::Amount;
use exchange_core::error::WithdrawError;
use exchange_core::store::ReserveHistoryEntry;
use serde::{Deserialize, Serialize};

use crate::state::ApiError;

#[derive(Debug, Deserialize)]
pub struct WithdrawRequestBody {
    pub reserve_pub: String,
    pub reserve_sig: String,
    pub denom_pub_hash: String,
    pub blinded_coin: String,
}

#[derive(Debug, Serialize)]
pub struct WithdrawResponseBody {
    pub blind_signature: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum HistoryEntryJson {
    Credit {
        amount: Amount,
        wire_reference: String,
        timestamp: DateTime<Utc>,
    },
    Withdraw {
        amount_with_fee: Amount,
        denom_pub_hash: String,
        timestamp: DateTime<Utc>,
    },
    Closing {
        amount: Amount,
        closing_fee: Amount,
        wtid: String,
        timestamp: DateTime<Utc>,
    },
}

impl From<&ReserveHistoryEntry> for HistoryEntryJson {
    fn from(entry: &ReserveHistoryEntry) -> Self {
        match entry {
            ReserveHistoryEntry::Credit {
                amount,
                wire_reference,
                timestamp,
            } => HistoryEntryJson::Credit {
                amount: *amount,
                wire_reference: wire_reference.clone(),
                timestamp: *timestamp,
            },
            ReserveHistoryEntry::Withdraw {
                amount_with_fee,
                denom_pub_hash,
                timestamp,
                ..
            } => HistoryEntryJson::Withdraw {
                amount_with_fee: *amount_with_fee,
                denom_pub_hash: exchange_core::base32::encode(denom_pub_hash),
                timestamp: *timestamp,
            },
            ReserveHistoryEntry::Closing {
                amount,
                closing_fee,
                wtid,
                timestamp,
            } => HistoryEntryJson::Closing {
                amount: *amount,
                closing_fee: *closing_fee,
                wtid: exchange_core::base32::encode(wtid),
                timestamp: *timestamp,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReserveStatusResponseBody {
    pub balance: Amount,
    pub history: Vec<HistoryEntryJson>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub detail: String,
    pub balance: Option<Amount>,
    pub history: Option<Vec<HistoryEntryJson>>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, detail, balance, history) = match self {
            ApiError::Withdraw(WithdrawError::InsufficientFunds { balance, history }) => (
                StatusCode::CONFLICT,
                "INSUFFICIENT_FUNDS".to_string(),
                "reserve balance is insufficient to cover the withdrawal".to_string(),
                Some(balance),
                Some(history.iter().map(HistoryEntryJson::from).collect()),
            ),
            ApiError::Withdraw(e) => (
                StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                e.code().to_string(),
                e.to_string(),
                None,
                None,
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST".to_string(),
                msg,
                None,
                None,
            ),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                "RESERVE_UNKNOWN".to_string(),
                "no reserve with this public key".to_string(),
                None,
                None,
            ),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL".to_string(),
                msg,
                None,
                None,
            ),
        };
        (
            status,
            Json(ErrorBody {
                code,
                detail,
                balance,
                history,
            }),
        )
            .into_response()
    }
}
