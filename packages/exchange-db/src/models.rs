//! Row types for `sqlx::query_as`. Amount columns are always the
//! `(val, frac, curr)` triple; [`crate::amount_codec`] converts them to
//! and from `exchange_core::Amount`.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, FromRow)]
pub struct ReserveRow {
    pub reserve_pub: Vec<u8>,
    pub current_balance_val: i64,
    pub current_balance_frac: i32,
    pub current_balance_curr: String,
    pub expiration_date: DateTime<Utc>,
    pub sender_account: String,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
pub struct ReserveInRow {
    pub reserve_pub: Vec<u8>,
    pub wire_reference: String,
    pub credit_val: i64,
    pub credit_frac: i32,
    pub credit_curr: String,
    pub execution_date: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub struct ReserveOutRow {
    pub h_coin_envelope: Vec<u8>,
    pub reserve_pub: Vec<u8>,
    pub denom_pub_hash: Vec<u8>,
    pub reserve_sig: Vec<u8>,
    pub blinded_coin: Vec<u8>,
    pub blind_signature: Vec<u8>,
    pub amount_with_fee_val: i64,
    pub amount_with_fee_frac: i32,
    pub amount_with_fee_curr: String,
    pub execution_date: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub struct ReserveCloseRow {
    pub reserve_pub: Vec<u8>,
    pub wtid: Vec<u8>,
    pub amount_val: i64,
    pub amount_frac: i32,
    pub amount_curr: String,
    pub closing_fee_val: i64,
    pub closing_fee_frac: i32,
    pub closing_fee_curr: String,
    pub execution_date: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub struct WireFeeRow {
    pub wire_fee_val: i64,
    pub wire_fee_frac: i32,
    pub wire_fee_curr: String,
    pub closing_fee_val: i64,
    pub closing_fee_frac: i32,
    pub closing_fee_curr: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}
