//! Storage-agnostic transaction logic for the exchange: fixed-point
//! amounts, blind-signature issuance, the withdraw transaction, and the
//! reserve-closer sweep. Nothing in this crate talks to a database or an
//! HTTP socket; `exchange-db` and `exchange-httpd`/`exchange-closer`
//! build on top of it.

pub mod amount;
pub mod base32;
pub mod blind_sign;
pub mod closer;
pub mod crypto;
pub mod denomination;
pub mod error;
pub mod reserves;
pub mod store;
pub mod wire_record;
pub mod withdraw;

pub use amount::{Amount, AmountArithmeticError, AmountParseError};
pub use error::WithdrawError;
