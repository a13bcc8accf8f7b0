//! Currency-tagged fixed-point money.
//!
//! Every financial decision in the exchange flows through [`Amount`]: a
//! `(currency, value, fraction)` triple where `fraction` counts units of
//! `1 / FRAC_BASE`. Arithmetic saturates/errors rather than wrapping, so a
//! reserve balance can never silently lose or gain a fraction of a cent.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Maximum length of the currency tag, including the implicit NUL padding
/// used by the network-byte-order wire form.
pub const CURRENCY_LEN: usize = 12;

/// Denominator of the fractional part: one "value" unit is `FRAC_BASE`
/// fraction units.
pub const FRAC_BASE: u32 = 100_000_000;

/// Number of decimal digits the fractional part can carry.
const FRAC_DIGITS: usize = 8;

/// Largest legal `value`: the IEEE-754 double / JavaScript safe-integer
/// bound, minus one. `2^52` itself is rejected (see `SPEC_FULL.md`: this
/// is stricter than the original C implementation's `<= 2^52`, and the
/// distilled spec's own worked example requires rejecting exactly `2^52`).
pub const MAX_AMOUNT_VALUE: u64 = (1u64 << 52) - 1;

/// Failure modes for amount arithmetic. Every variant corresponds to one
/// of the abstract "flags" in the specification's `subtract`/`add`/
/// `normalize`/`round_down` contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AmountArithmeticError {
    #[error("amounts use incompatible or invalid currencies")]
    IncompatibleCurrencies,
    #[error("amount could not be normalized (fractional overflow)")]
    InvalidNormalization,
    #[error("operation would yield a negative amount")]
    NegativeResult,
    #[error("result exceeds the legal amount range")]
    Overflow,
}

/// Failure modes for parsing a canonical `T:V[.F]` string or constructing
/// an `Amount` directly from parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AmountParseError {
    #[error("currency tag is empty")]
    EmptyCurrency,
    #[error("currency tag is longer than {CURRENCY_LEN} characters")]
    CurrencyTooLong,
    #[error("value is missing")]
    MissingValue,
    #[error("value contains a non-decimal character")]
    InvalidValueDigit,
    #[error("value exceeds the legal amount range")]
    ValueTooLarge,
    #[error("fractional part is missing after '.'")]
    MissingFraction,
    #[error("fractional part contains a non-decimal character")]
    InvalidFractionDigit,
    #[error("fractional part has more than {FRAC_DIGITS} digits")]
    FractionTooPrecise,
}

/// A currency-tagged fixed-point amount, held in host byte order.
///
/// An `Amount` is always valid by construction: the currency tag is
/// non-empty and `value <= MAX_AMOUNT_VALUE`. It is not necessarily
/// normalized (`fraction` may be `>= FRAC_BASE`); callers that need a
/// normalized amount call [`Amount::normalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Amount {
    currency: [u8; CURRENCY_LEN],
    pub value: u64,
    pub fraction: u32,
}

impl Amount {
    /// Construct an amount from parts, validating the currency tag and
    /// the value bound. The fraction is accepted un-normalized.
    pub fn from_parts(currency: &str, value: u64, fraction: u32) -> Result<Self, AmountParseError> {
        let mut tag = [0u8; CURRENCY_LEN];
        if currency.is_empty() {
            return Err(AmountParseError::EmptyCurrency);
        }
        if currency.len() >= CURRENCY_LEN {
            return Err(AmountParseError::CurrencyTooLong);
        }
        tag[..currency.len()].copy_from_slice(currency.as_bytes());
        if value > MAX_AMOUNT_VALUE {
            return Err(AmountParseError::ValueTooLarge);
        }
        Ok(Self {
            currency: tag,
            value,
            fraction,
        })
    }

    /// The zero amount in the given currency.
    pub fn zero(currency: &str) -> Result<Self, AmountParseError> {
        Self::from_parts(currency, 0, 0)
    }

    /// The currency tag, with the zero-padding stripped.
    pub fn currency(&self) -> &str {
        let end = self
            .currency
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(CURRENCY_LEN);
        // Safety/validity: `from_parts` only ever stores ASCII bytes.
        std::str::from_utf8(&self.currency[..end]).unwrap_or("")
    }

    /// An amount is valid iff its currency tag is non-empty. `Amount`
    /// values constructed through this module are always valid; this
    /// exists so callers deserializing from storage can assert the
    /// invariant.
    pub fn is_valid(&self) -> bool {
        self.currency[0] != 0
    }

    fn same_currency(&self, other: &Amount) -> bool {
        self.currency().eq_ignore_ascii_case(other.currency())
    }

    /// Normalize in place: move whole units out of `fraction` and into
    /// `value`. Returns `Ok(true)` if the representation changed,
    /// `Ok(false)` if it was already normalized.
    pub fn normalize(&mut self) -> Result<bool, AmountArithmeticError> {
        if self.fraction < FRAC_BASE {
            return Ok(false);
        }
        let overflow = (self.fraction / FRAC_BASE) as u64;
        self.fraction %= FRAC_BASE;
        let new_value = self
            .value
            .checked_add(overflow)
            .ok_or(AmountArithmeticError::InvalidNormalization)?;
        if new_value > MAX_AMOUNT_VALUE {
            return Err(AmountArithmeticError::InvalidNormalization);
        }
        self.value = new_value;
        Ok(true)
    }

    /// A normalized copy of this amount.
    pub fn normalized(mut self) -> Result<Self, AmountArithmeticError> {
        self.normalize()?;
        Ok(self)
    }

    /// Compare the magnitude of two amounts (currency is not considered
    /// beyond asserting both sides agree). Per the specification,
    /// comparing amounts of differing currencies is a programmer error
    /// and panics deterministically rather than returning a sentinel.
    pub fn compare(&self, other: &Amount) -> Ordering {
        assert!(
            self.same_currency(other),
            "Amount::compare called on incompatible currencies ({} vs {})",
            self.currency(),
            other.currency()
        );
        let n1 = self.normalized().expect("comparand failed to normalize");
        let n2 = other.normalized().expect("comparand failed to normalize");
        n1.value.cmp(&n2.value).then(n1.fraction.cmp(&n2.fraction))
    }

    /// `a - b`. Returns the difference and whether it is exactly zero.
    pub fn subtract(a: Amount, b: Amount) -> Result<(Amount, bool), AmountArithmeticError> {
        if !a.same_currency(&b) {
            return Err(AmountArithmeticError::IncompatibleCurrencies);
        }
        let mut n1 = a
            .normalized()
            .map_err(|_| AmountArithmeticError::InvalidNormalization)?;
        let n2 = b
            .normalized()
            .map_err(|_| AmountArithmeticError::InvalidNormalization)?;

        if n1.fraction < n2.fraction {
            if n1.value == 0 {
                return Err(AmountArithmeticError::NegativeResult);
            }
            n1.fraction += FRAC_BASE;
            n1.value -= 1;
        }
        if n1.value < n2.value {
            return Err(AmountArithmeticError::NegativeResult);
        }
        let diff = Amount {
            currency: a.currency,
            value: n1.value - n2.value,
            fraction: n1.fraction - n2.fraction,
        };
        let is_zero = diff.value == 0 && diff.fraction == 0;
        Ok((diff, is_zero))
    }

    /// `a + b`. Overflow (past `MAX_AMOUNT_VALUE`, or a wrapping add) is
    /// reported as [`AmountArithmeticError::Overflow`].
    pub fn add(a: Amount, b: Amount) -> Result<(Amount, bool), AmountArithmeticError> {
        if !a.same_currency(&b) {
            return Err(AmountArithmeticError::IncompatibleCurrencies);
        }
        let n1 = a
            .normalized()
            .map_err(|_| AmountArithmeticError::InvalidNormalization)?;
        let n2 = b
            .normalized()
            .map_err(|_| AmountArithmeticError::InvalidNormalization)?;

        let value = n1
            .value
            .checked_add(n2.value)
            .ok_or(AmountArithmeticError::Overflow)?;
        if value > MAX_AMOUNT_VALUE {
            return Err(AmountArithmeticError::Overflow);
        }
        let mut sum = Amount {
            currency: a.currency,
            value,
            fraction: n1.fraction + n2.fraction,
        };
        sum.normalize().map_err(|_| AmountArithmeticError::Overflow)?;
        let is_zero = sum.value == 0 && sum.fraction == 0;
        Ok((sum, is_zero))
    }

    /// `dividend / divisor`, truncating toward zero at the `1e-8`
    /// quantum. A zero divisor is a programmer error and panics, per the
    /// specification.
    pub fn divide(dividend: Amount, divisor: u32) -> Amount {
        assert!(divisor != 0, "Amount::divide by zero");
        let mut result = dividend.normalized().expect("dividend failed to normalize");
        if divisor == 1 {
            return result;
        }
        let divisor = divisor as u64;
        let modr = result.value % divisor;
        result.value /= divisor;
        let combined = modr * FRAC_BASE as u64 + result.fraction as u64;
        result.fraction = (combined / divisor) as u32;
        result
            .normalize()
            .expect("division result failed to normalize");
        result
    }

    /// Round `amount` down toward zero to a multiple of `unit`. Exactly
    /// one of `unit.value`/`unit.fraction` must be non-zero (asserted);
    /// if both are zero, rounding is a no-op and `Ok(false)` is returned,
    /// matching the original implementation's behavior for an
    /// unconfigured rounding unit.
    pub fn round_down(
        amount: Amount,
        unit: &Amount,
    ) -> Result<(Amount, bool), AmountArithmeticError> {
        if !amount.same_currency(unit) {
            return Err(AmountArithmeticError::IncompatibleCurrencies);
        }
        assert!(
            !(unit.value != 0 && unit.fraction != 0),
            "Amount::round_down: unit must not have both value and fraction set"
        );
        if unit.value == 0 && unit.fraction == 0 {
            return Ok((amount, false));
        }
        let mut out = amount;
        if unit.fraction != 0 {
            let delta = out.fraction % unit.fraction;
            if delta == 0 {
                return Ok((out, false));
            }
            out.fraction -= delta;
            return Ok((out, true));
        }
        let delta = out.value % unit.value;
        if delta == 0 {
            return Ok((out, false));
        }
        out.value -= delta;
        out.fraction = 0;
        Ok((out, true))
    }

    /// Convert to network-byte-order form for persistence/signing.
    pub fn hton(&self) -> AmountNbo {
        AmountNbo {
            currency: self.currency,
            value_be: self.value.to_be_bytes(),
            fraction_be: self.fraction.to_be_bytes(),
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let norm = self.normalized().unwrap_or(*self);
        if norm.fraction == 0 {
            write!(f, "{}:{}", norm.currency(), norm.value)
        } else {
            let mut n = norm.fraction;
            let mut tail = String::with_capacity(FRAC_DIGITS);
            let mut base = FRAC_BASE / 10;
            while base > 0 && n != 0 {
                let digit = n / base;
                tail.push((b'0' + digit as u8) as char);
                n %= base;
                base /= 10;
            }
            write!(f, "{}:{}.{}", norm.currency(), norm.value, tail)
        }
    }
}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_start();
        let colon = s.find(':').ok_or(AmountParseError::EmptyCurrency)?;
        if colon == 0 {
            return Err(AmountParseError::EmptyCurrency);
        }
        if colon >= CURRENCY_LEN {
            return Err(AmountParseError::CurrencyTooLong);
        }
        let currency = &s[..colon];
        let rest = &s[colon + 1..];
        if rest.is_empty() {
            return Err(AmountParseError::MissingValue);
        }

        let mut value: u64 = 0;
        let mut chars = rest.char_indices();
        let mut dot_at = None;
        for (i, c) in chars.by_ref() {
            if c == '.' {
                dot_at = Some(i);
                break;
            }
            let digit = c.to_digit(10).ok_or(AmountParseError::InvalidValueDigit)? as u64;
            let next = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(digit))
                .ok_or(AmountParseError::ValueTooLarge)?;
            if value > MAX_AMOUNT_VALUE || next > MAX_AMOUNT_VALUE {
                return Err(AmountParseError::ValueTooLarge);
            }
            value = next;
        }

        let mut fraction: u32 = 0;
        if let Some(dot_idx) = dot_at {
            let frac_str = &rest[dot_idx + 1..];
            if frac_str.is_empty() {
                return Err(AmountParseError::MissingFraction);
            }
            let mut base = FRAC_BASE / 10;
            for c in frac_str.chars() {
                if base == 0 {
                    return Err(AmountParseError::FractionTooPrecise);
                }
                let digit = c.to_digit(10).ok_or(AmountParseError::InvalidFractionDigit)?;
                fraction += digit * base;
                base /= 10;
            }
        }

        Amount::from_parts(currency, value, fraction)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            currency: &'a str,
            value: u64,
            fraction: u32,
        }
        Wire {
            currency: self.currency(),
            value: self.value,
            fraction: self.fraction,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Wire {
            currency: String,
            value: u64,
            fraction: u32,
        }
        let wire = Wire::deserialize(deserializer)?;
        Amount::from_parts(&wire.currency, wire.value, wire.fraction).map_err(serde::de::Error::custom)
    }
}

/// Network-byte-order representation of an [`Amount`], used for
/// persistence and for the signed withdraw-request purpose blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountNbo {
    currency: [u8; CURRENCY_LEN],
    value_be: [u8; 8],
    fraction_be: [u8; 4],
}

impl AmountNbo {
    /// Convert back to host byte order.
    pub fn ntoh(&self) -> Amount {
        Amount {
            currency: self.currency,
            value: u64::from_be_bytes(self.value_be),
            fraction: u32::from_be_bytes(self.fraction_be),
        }
    }

    /// Raw bytes as they appear in the signed purpose blob: currency tag,
    /// then value, then fraction, all big-endian.
    pub fn to_bytes(&self) -> [u8; CURRENCY_LEN + 8 + 4] {
        let mut buf = [0u8; CURRENCY_LEN + 8 + 4];
        buf[..CURRENCY_LEN].copy_from_slice(&self.currency);
        buf[CURRENCY_LEN..CURRENCY_LEN + 8].copy_from_slice(&self.value_be);
        buf[CURRENCY_LEN + 8..].copy_from_slice(&self.fraction_be);
        buf
    }
}
