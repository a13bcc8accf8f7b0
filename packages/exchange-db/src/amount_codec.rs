//! Conversion between `exchange_core::Amount` and the `(val, frac, curr)`
//! column triple every amount-bearing table uses.

use exchange_core::Amount;

#[derive(Debug, thiserror::Error)]
#[error("amount column triple is malformed: {0}")]
pub struct AmountColumnError(#[from] exchange_core::AmountParseError);

pub fn decode(value: i64, fraction: i32, currency: &str) -> Result<Amount, AmountColumnError> {
    Amount::from_parts(currency, value as u64, fraction as u32).map_err(Into::into)
}

pub struct AmountColumns {
    pub value: i64,
    pub fraction: i32,
    pub currency: String,
}

pub fn encode(amount: &Amount) -> AmountColumns {
    AmountColumns {
        value: amount.value as i64,
        fraction: amount.fraction as i32,
        currency: amount.currency().to_string(),
    }
}
